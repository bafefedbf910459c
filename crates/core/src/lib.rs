//! Sender side of Interledger STREAM.
//!
//! A [`PaymentSender`] drives a payment over one [`StreamConnection`] as a
//! sequence of ILP packets. Every packet passes through a chain of
//! [filters](filters) that enforce the minimum exchange rate, discover the
//! path's max packet amount, pace transmission and decide when the payment
//! is done or has failed. The packet transport ([`Link`]) and the STREAM
//! wire codec ([`StreamPacketCodec`]) are supplied by the caller.

/// Sender tuning knobs and their TOML representation.
pub mod config;

/// Endpoints, shared secret and sequence numbers of a connection.
pub mod connection;

pub mod crypto;

pub mod error;

/// The per-packet filter pipeline.
pub mod filters;

pub mod link;

/// Exact rational arithmetic for amounts and rates.
pub mod math;

pub mod packet;

pub mod payment;

pub mod request;

pub mod send_state;

/// Shared path and payment state observed by the filters.
pub mod trackers;

/// Tracing subscriber setup.
pub mod tracing;

pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::SenderConfig;
pub use connection::StreamConnection;
pub use error::PaymentError;
pub use link::{Link, StreamPacketCodec};
pub use payment::{Amount, PaymentReceipt, PaymentSender, Quote, QuoteRequest, StopHandle};
pub use send_state::SendState;
