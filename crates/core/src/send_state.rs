use std::fmt;

use crate::error::PaymentError;

/// Control signal returned by every filter before a packet is sent.
///
/// `Ready`, `Wait` and `End` keep the payment alive (or end it cleanly);
/// `Failed` ends it with the recorded reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Send the packet that was just assembled.
    Ready,
    /// Nothing can be sent right now; ask again later.
    Wait,
    /// The payment finished successfully; stop sending.
    End,
    /// The payment cannot continue.
    Failed(PaymentError),
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendState::Ready => write!(f, "ready"),
            SendState::Wait => write!(f, "wait"),
            SendState::End => write!(f, "end"),
            SendState::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}
