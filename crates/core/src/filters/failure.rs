//! Terminal reject classification and the idle timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::error::PaymentError;
use crate::packet::ErrorCode;
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::util::duration_as_nanos;
use crate::util::time_source::{InstantTimeSrc, TimeSource};

/// Reject codes that do not end the payment.
///
/// Temporary errors only slow the sender down, F08 feeds the max packet
/// search, F99 is how the receiver refuses unfulfillable or underpaid
/// packets, and R01 means the packet merely shrank below a hop's minimum.
pub fn is_tolerated_reject(code: ErrorCode) -> bool {
    code.is_temporary()
        || code == ErrorCode::F08_AMOUNT_TOO_LARGE
        || code == ErrorCode::F99_APPLICATION_ERROR
        || code == ErrorCode::R01_INSUFFICIENT_SOURCE_AMOUNT
}

pub struct FailureFilter<T: TimeSource = InstantTimeSrc> {
    epoch: Instant,
    /// Nanoseconds since `epoch` of the latest fulfill, or of the start.
    last_fulfill: AtomicU64,
    idle_timeout: Option<Duration>,
    terminal: OnceLock<PaymentError>,
    time_source: T,
}

impl FailureFilter<InstantTimeSrc> {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self::new_with_time_source(idle_timeout, InstantTimeSrc::new())
    }
}

impl<T: TimeSource> FailureFilter<T> {
    /// `None` disables the idle timeout, as used while probing.
    pub fn new_with_time_source(idle_timeout: Option<Duration>, time_source: T) -> Self {
        Self {
            epoch: time_source.now(),
            last_fulfill: AtomicU64::new(0),
            idle_timeout,
            terminal: OnceLock::new(),
            time_source,
        }
    }

    pub fn error(&self) -> Option<PaymentError> {
        self.terminal.get().copied()
    }

    fn elapsed_nanos(&self) -> u64 {
        duration_as_nanos(self.time_source.now().saturating_duration_since(self.epoch))
    }

    fn time_since_last_fulfill(&self) -> Duration {
        let last = self.last_fulfill.load(Ordering::Acquire);
        Duration::from_nanos(self.elapsed_nanos().saturating_sub(last))
    }

    fn record_terminal(&self, error: PaymentError, reason: &str) {
        if self.terminal.set(error).is_ok() {
            tracing::warn!(%error, reason, "ending payment");
        }
    }

    fn observe(&self, reply: &StreamPacketReply) {
        if reply.is_fulfill() {
            self.last_fulfill
                .fetch_max(self.elapsed_nanos(), Ordering::AcqRel);
        }

        if let Some(reject) = reply.response.reject() {
            if !is_tolerated_reject(reject.code) {
                tracing::debug!(
                    code = %reject.code,
                    triggered_by = ?reject.triggered_by,
                    message = %reject.message,
                    "final reject"
                );
                self.record_terminal(PaymentError::ConnectorError, "final reject");
            }
        }

        if reply.close_frame().is_some() {
            self.record_terminal(PaymentError::ClosedByReceiver, "receiver closed");
        }
    }
}

impl<T: TimeSource + Send + Sync + 'static> StreamPacketFilter for FailureFilter<T> {
    fn next_state(&self, _request: &mut RequestBuilder) -> SendState {
        if let Some(error) = self.error() {
            return SendState::Failed(error);
        }
        if let Some(idle_timeout) = self.idle_timeout {
            let idle = self.time_since_last_fulfill();
            if idle >= idle_timeout {
                tracing::warn!(?idle, "no packet fulfilled within the idle timeout");
                return SendState::Failed(PaymentError::IdleTimeout);
            }
        }
        SendState::Ready
    }

    fn do_filter(
        self: Arc<Self>,
        request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        let reply = chain.do_filter(request);
        async move {
            let reply = reply.await;
            self.observe(&reply);
            reply
        }
        .boxed()
    }
}
