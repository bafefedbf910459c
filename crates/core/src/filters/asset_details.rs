use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{FilterChain, StreamPacketFilter};
use crate::packet::{Denomination, Frame, IlpAddress, StreamErrorCode, DEFAULT_STREAM_ID};
use crate::request::{RequestBuilder, StreamPacketReply, StreamPacketRequest};
use crate::send_state::SendState;
use crate::trackers::AssetDetailsTracker;

/// Tells the receiver who we are until it answers, and learns its asset.
///
/// Announcement packets also advertise zero receive limits, since the sender
/// never accepts money on this connection.
pub struct AssetDetailsFilter {
    tracker: Arc<AssetDetailsTracker>,
    source_address: IlpAddress,
    source_denomination: Option<Denomination>,
}

impl AssetDetailsFilter {
    pub fn new(
        tracker: Arc<AssetDetailsTracker>,
        source_address: IlpAddress,
        source_denomination: Option<Denomination>,
    ) -> Self {
        Self {
            tracker,
            source_address,
            source_denomination,
        }
    }
}

impl StreamPacketFilter for AssetDetailsFilter {
    fn next_state(&self, request: &mut RequestBuilder) -> SendState {
        if let Some(error) = self.tracker.error() {
            return SendState::Failed(error);
        }
        if self.tracker.should_announce() {
            request.push_frame(Frame::ConnectionNewAddress {
                source_account: self.source_address.clone(),
            });
            if let Some(denomination) = &self.source_denomination {
                request.push_frame(Frame::ConnectionAssetDetails {
                    source_denomination: denomination.clone(),
                });
            }
            request
                .push_frame(Frame::ConnectionMaxData { max_offset: 0 })
                .push_frame(Frame::StreamMaxMoney {
                    stream_id: DEFAULT_STREAM_ID,
                    receive_max: 0,
                    total_received: 0,
                });
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
            let mut reply = reply.await;
            if self.tracker.on_reply(&reply) {
                reply.queue_close(Frame::ConnectionClose {
                    code: StreamErrorCode::ProtocolViolation,
                    message: "conflicting destination asset details".into(),
                });
            }
            reply
        }
        .boxed()
    }
}
