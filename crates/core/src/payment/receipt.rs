use serde::Serialize;

use crate::error::PaymentError;

/// Outcome of [`PaymentSender::pay`](super::PaymentSender::pay).
///
/// Amounts are totals over fulfilled packets only. `error` is `None` both for
/// a completed payment and for one stopped early through a
/// [`StopHandle`](super::StopHandle); `completed` tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    /// Source units sent in fulfilled packets.
    pub amount_sent: u64,
    /// Destination units the receiver acknowledged.
    pub amount_delivered: u64,
    /// Source units still unresolved when the payment returned; zero unless a task was lost.
    pub amount_in_flight_at_end: u64,
    pub packets_fulfilled: u64,
    pub packets_rejected: u64,
    pub completed: bool,
    pub error: Option<PaymentError>,
}

impl PaymentReceipt {
    pub fn is_success(&self) -> bool {
        self.completed && self.error.is_none()
    }
}
