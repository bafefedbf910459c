use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::{AimdController, PacingTracker};
use crate::util::time_source::{InstantTimeSrc, TimeSource};

/// Holds packets back until the pacing tracker allows one, and feeds replies
/// to both the pacing tracker and the amount window.
pub struct PacingFilter<T: TimeSource = InstantTimeSrc> {
    pacing: Arc<PacingTracker<T>>,
    window: Arc<AimdController>,
}

impl<T: TimeSource> PacingFilter<T> {
    pub fn new(pacing: Arc<PacingTracker<T>>, window: Arc<AimdController>) -> Self {
        Self { pacing, window }
    }
}

impl<T: TimeSource + Send + Sync + 'static> StreamPacketFilter for PacingFilter<T> {
    fn next_state(&self, _request: &mut RequestBuilder) -> SendState {
        if self.pacing.can_send() {
            SendState::Ready
        } else {
            SendState::Wait
        }
    }

    fn do_filter(
        self: Arc<Self>,
        request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        let source_amount = request.source_amount;
        let sent_at = self.pacing.on_send();
        self.window.prepare(source_amount);
        let reply = chain.do_filter(request);
        async move {
            let reply = reply.await;
            self.pacing.on_reply(&reply, sent_at);
            match reply.reject_code() {
                None => self.window.on_fulfill(source_amount),
                Some(code) => self.window.on_reject(source_amount, code),
            }
            reply
        }
        .boxed()
    }
}

