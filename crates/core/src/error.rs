//! Error types for the sender.
//!
//! [`PaymentError`] is the payment-ending half of [`SendState`](crate::SendState):
//! it is returned by filters, recorded in the receipt and never raised from
//! inside the filter chain. The remaining enums describe failures of the
//! external collaborators (link, codec, encryption) and of configuration.

use serde_with::SerializeDisplay;
use thiserror::Error;

/// Why a payment could not be quoted or could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, SerializeDisplay)]
pub enum PaymentError {
    // caller configuration, detected before any packet is sent
    #[error("slippage must be a ratio in [0, 1)")]
    InvalidSlippage,
    #[error("connection credentials are missing or invalid")]
    InvalidCredentials,
    #[error("source and destination are on incompatible Interledger networks")]
    IncompatibleInterledgerNetworks,
    #[error("source asset details are unknown")]
    UnknownSourceAsset,
    #[error("source amount is invalid")]
    InvalidSourceAmount,
    #[error("destination amount is invalid")]
    InvalidDestinationAmount,
    #[error("minimum exchange rate of zero cannot enforce delivery")]
    UnenforceableDelivery,

    // path and receiver
    #[error("destination asset details are unknown")]
    UnknownDestinationAsset,
    #[error("receiver sent conflicting asset details")]
    DestinationAssetConflict,
    #[error("receiver cannot accept the amount to deliver")]
    IncompatibleReceiveMax,
    #[error("receiver violated the STREAM protocol")]
    ReceiverProtocolViolation,
    #[error("receiver closed the connection")]
    ClosedByReceiver,
    #[error("rate probe failed to establish an exchange rate")]
    RateProbeFailed,
    #[error("connector rejected the payment with a final error")]
    ConnectorError,

    // safety margin
    #[error("probed exchange rate is below the minimum")]
    InsufficientExchangeRate,
    #[error("max packet amount is too small to enforce the rate without rounding errors")]
    ExchangeRateRoundingError,
    #[error("exceeded the maximum safe sequence number for this connection")]
    ExceededMaxSequence,

    #[error("no packet was fulfilled within the idle timeout")]
    IdleTimeout,
}

impl PaymentError {
    /// Whether a fresh attempt at a higher level (new quote, new connection) could succeed.
    ///
    /// Nothing is retried automatically inside a payment.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::IdleTimeout
                | PaymentError::ConnectorError
                | PaymentError::RateProbeFailed
                | PaymentError::InsufficientExchangeRate
                | PaymentError::ExceededMaxSequence
        )
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not connected")]
    Disconnected,
    #[error("timed out waiting for a response after {0:?}")]
    Timeout(std::time::Duration),
    #[error("link error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of data, needed {needed} bytes but {available} remain")]
    UnexpectedEof { needed: usize, available: usize },
    #[error("invalid packet: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext of {0} bytes is too short")]
    CiphertextTooShort(usize),
    #[error("authentication failed while decrypting")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
}

/// Why a request could not be turned into an ILP Prepare.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("failed to encode stream packet: {0}")]
    Encode(#[from] CodecError),
    #[error("failed to encrypt stream packet: {0}")]
    Encrypt(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address exceeds {max} characters")]
    TooLong { max: usize },
    #[error("unknown allocation scheme `{0}`")]
    UnknownScheme(String),
    #[error("invalid address segment `{0}`")]
    InvalidSegment(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("slippage must be in [0, 1), got {0}")]
    Slippage(crate::math::Ratio),
    #[error("rate probe amounts must not be empty")]
    NoProbeAmounts,
}
