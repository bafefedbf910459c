use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::{AimdController, AmountTracker, ExchangeRateTracker, MaxPacketAmountTracker};

/// Sizes packets toward the payment target and settles what they moved.
pub struct AmountFilter {
    amount: Arc<AmountTracker>,
    rates: Arc<ExchangeRateTracker>,
    max_packet: Arc<MaxPacketAmountTracker>,
    window: Arc<AimdController>,
}

impl AmountFilter {
    pub fn new(
        amount: Arc<AmountTracker>,
        rates: Arc<ExchangeRateTracker>,
        max_packet: Arc<MaxPacketAmountTracker>,
        window: Arc<AimdController>,
    ) -> Self {
        Self {
            amount,
            rates,
            max_packet,
            window,
        }
    }
}

impl StreamPacketFilter for AmountFilter {
    fn next_state(&self, request: &mut RequestBuilder) -> SendState {
        self.amount
            .next_state(request, &self.rates, &self.max_packet, &self.window)
    }

    fn do_filter(
        self: Arc<Self>,
        request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        let reservation = self
            .amount
            .reserve(request.source_amount, request.min_destination_amount);
        let reply = chain.do_filter(request);
        async move {
            let reply = reply.await;
            self.amount.settle(reservation, &reply);
            reply
        }
        .boxed()
    }
}
