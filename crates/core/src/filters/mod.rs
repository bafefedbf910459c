//! The filter pipeline wrapped around every packet.
//!
//! Each filter gets two hooks:
//!
//! - [`StreamPacketFilter::next_state`] runs before a packet exists. Filters
//!   may veto the send (`Wait`, `End`, `Failed`) or contribute to the
//!   [`RequestBuilder`]. The first non-`Ready` answer wins.
//! - [`StreamPacketFilter::do_filter`] wraps the call into the rest of the
//!   chain. Code before the call runs synchronously on the driver, in chain
//!   order, so it can claim shared resources (sequence numbers, in-flight
//!   amounts) without racing other packets. Code after the call runs when the
//!   reply arrives, on whichever task owns the packet.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;

pub mod amount;
pub mod asset_details;
pub mod exchange_rate;
pub mod failure;
pub mod max_packet;
pub mod pacing;
pub mod rate_probe;
pub mod sender;
pub mod sequence;

pub use amount::AmountFilter;
pub use asset_details::AssetDetailsFilter;
pub use exchange_rate::ExchangeRateFilter;
pub use failure::FailureFilter;
pub use max_packet::MaxPacketFilter;
pub use pacing::PacingFilter;
pub use rate_probe::RateProbeFilter;
pub use sender::StreamPacketSender;
pub use sequence::SequenceFilter;

pub trait StreamPacketFilter: Send + Sync + 'static {
    fn next_state(&self, request: &mut RequestBuilder) -> SendState;

    fn do_filter(
        self: Arc<Self>,
        request: StreamPacketRequest,
        chain: FilterChain,
    ) -> BoxFuture<'static, StreamPacketReply> {
        chain.do_filter(request)
    }
}

/// The innermost link of the chain: puts the packet on the wire.
pub trait PacketSender: Send + Sync + 'static {
    fn send(&self, request: StreamPacketRequest) -> BoxFuture<'static, StreamPacketReply>;
}

/// An ordered set of filters plus a cursor into it.
#[derive(Clone)]
pub struct FilterChain {
    filters: Arc<[Arc<dyn StreamPacketFilter>]>,
    sender: Arc<dyn PacketSender>,
    position: usize,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn StreamPacketFilter>>, sender: Arc<dyn PacketSender>) -> Self {
        Self {
            filters: filters.into(),
            sender,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Ask every filter, in order, whether a packet may be sent.
    pub fn next_state(&self, request: &mut RequestBuilder) -> SendState {
        for filter in self.filters.iter() {
            match filter.next_state(request) {
                SendState::Ready => continue,
                state => return state,
            }
        }
        SendState::Ready
    }

    /// Pass the request to the filter under the cursor, or to the sender past the last one.
    pub fn do_filter(self, request: StreamPacketRequest) -> BoxFuture<'static, StreamPacketReply> {
        match self.filters.get(self.position).cloned() {
            Some(filter) => {
                let next = FilterChain {
                    position: self.position + 1,
                    ..self
                };
                filter.do_filter(request, next)
            }
            None => self.sender.send(request),
        }
    }
}
