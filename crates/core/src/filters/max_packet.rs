use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::error::PaymentError;
use crate::packet::ErrorCode;
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::MaxPacketAmountTracker;

pub struct MaxPacketFilter {
    tracker: Arc<MaxPacketAmountTracker>,
}

impl MaxPacketFilter {
    pub fn new(tracker: Arc<MaxPacketAmountTracker>) -> Self {
        Self { tracker }
    }
}

impl StreamPacketFilter for MaxPacketFilter {
    fn next_state(&self, _request: &mut RequestBuilder) -> SendState {
        if self.tracker.is_no_capacity() {
            return SendState::Failed(PaymentError::ConnectorError);
        }
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
            match reply.response.reject() {
                Some(reject) if reject.code == ErrorCode::F08_AMOUNT_TOO_LARGE => {
                    self.tracker
                        .reduce_max_packet_amount(source_amount, &reject.data);
                }
                // the receiver saw it, so every connector forwarded this amount
                _ if reply.is_authentic() => self.tracker.adjust_path_capacity(source_amount),
                _ => {}
            }
            reply
        }
        .boxed()
    }
}
