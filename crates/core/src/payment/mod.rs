//! Public entry points: quote a payment, then send it.
//!
//! ```text
//! PaymentSender::quote ── probe chain ──▶ Quote
//! PaymentSender::pay   ── payment chain ─▶ PaymentReceipt ── close
//! ```

mod quote;
mod receipt;
mod sender;

pub use quote::{Amount, Quote, QuoteRequest};
pub use receipt::PaymentReceipt;
pub use sender::{PaymentSender, StopHandle};
