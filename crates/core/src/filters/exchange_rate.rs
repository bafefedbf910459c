use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::ExchangeRateTracker;

/// Feeds every authentic reply's claimed amount into the rate bounds.
pub struct ExchangeRateFilter {
    tracker: Arc<ExchangeRateTracker>,
}

impl ExchangeRateFilter {
    pub fn new(tracker: Arc<ExchangeRateTracker>) -> Self {
        Self { tracker }
    }
}

impl StreamPacketFilter for ExchangeRateFilter {
    fn next_state(&self, _request: &mut RequestBuilder) -> SendState {
        SendState::Ready
    }

    fn do_filter(
        self: Arc<Self>,
        request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        let source_amount = request.source_amount;
        let reply = chain.do_filter(request);
        async move {
            let reply = reply.await;
            if let Some(received) = reply.destination_amount() {
                if source_amount > 0 {
                    self.tracker.update_rate(source_amount, received);
                }
            }
            reply
        }
        .boxed()
    }
}
