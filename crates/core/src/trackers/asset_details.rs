use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::error::PaymentError;
use crate::packet::{Denomination, Frame, DEFAULT_STREAM_ID};
use crate::request::StreamPacketReply;

/// Stored while the receiver has not advertised a limit.
const UNLIMITED: u64 = u64::MAX;

/// What the sender knows about the receiver's asset and stream limit.
///
/// The denomination is set once, either up front by the caller or from the
/// first `ConnectionAssetDetails` frame; a later frame that disagrees is a
/// conflict and ends the payment.
#[derive(Debug)]
pub struct AssetDetailsTracker {
    destination: OnceLock<Denomination>,
    remote_knows_address: AtomicBool,
    conflict: AtomicBool,
    receive_max: AtomicU64,
}

impl AssetDetailsTracker {
    pub fn new(expected_destination: Option<Denomination>) -> Self {
        let tracker = Self {
            destination: OnceLock::new(),
            remote_knows_address: AtomicBool::new(false),
            conflict: AtomicBool::new(false),
            receive_max: AtomicU64::new(UNLIMITED),
        };
        if let Some(denomination) = expected_destination {
            let _ = tracker.destination.set(denomination);
        }
        tracker
    }

    pub fn destination_denomination(&self) -> Option<&Denomination> {
        self.destination.get()
    }

    /// Pin the destination asset the caller expects, or check it against the learned one.
    pub fn expect_destination(&self, expected: &Denomination) -> Result<(), PaymentError> {
        let known = self.destination.get_or_init(|| expected.clone());
        if known != expected {
            tracing::warn!(%known, %expected, "destination asset differs from the expected one");
            return Err(PaymentError::DestinationAssetConflict);
        }
        Ok(())
    }

    /// Latest `receive_max` the receiver advertised for the payment stream.
    pub fn receive_max(&self) -> Option<u64> {
        let receive_max = self.receive_max.load(Ordering::Acquire);
        (receive_max != UNLIMITED).then_some(receive_max)
    }

    /// Whether the receiver has not yet proven it knows our address.
    pub fn should_announce(&self) -> bool {
        !self.remote_knows_address.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<PaymentError> {
        self.conflict
            .load(Ordering::Acquire)
            .then_some(PaymentError::DestinationAssetConflict)
    }

    /// Returns `true` if this reply is the one that revealed a conflict.
    pub fn on_reply(&self, reply: &StreamPacketReply) -> bool {
        if !reply.is_authentic() {
            return false;
        }
        self.remote_knows_address.store(true, Ordering::Release);

        let mut newly_conflicted = false;

        for frame in reply.frames() {
            let source_denomination = match frame {
                Frame::ConnectionAssetDetails {
                    source_denomination,
                } => source_denomination,
                Frame::StreamMaxMoney {
                    stream_id: DEFAULT_STREAM_ID,
                    receive_max,
                    ..
                } => {
                    self.receive_max.store(*receive_max, Ordering::Release);
                    continue;
                }
                _ => continue,
            };
            let known = self
                .destination
                .get_or_init(|| source_denomination.clone());
            if known != source_denomination {
                tracing::warn!(
                    %known,
                    received = %source_denomination,
                    "receiver sent conflicting asset details"
                );
                newly_conflicted |= !self.conflict.swap(true, Ordering::AcqRel);
            } else {
                tracing::debug!(denomination = %known, "destination asset details");
            }
        }
        newly_conflicted
    }
}
