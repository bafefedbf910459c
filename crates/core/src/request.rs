//! Values that flow through the filter chain for one packet.

use bytes::Bytes;

use crate::packet::{ErrorCode, Frame, IlpReject, IlpResponse, StreamPacket};

/// Collects the next packet's parameters while the chain decides whether to send.
///
/// Filters write to the builder from `next_state`; the driver turns it into a
/// [`StreamPacketRequest`] once every filter returned `Ready`.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    pub source_amount: u64,
    pub min_destination_amount: u64,
    pub frames: Vec<Frame>,
    pub is_fulfillable: bool,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, frame: Frame) -> &mut Self {
        self.frames.push(frame);
        self
    }

    pub fn build(self) -> StreamPacketRequest {
        StreamPacketRequest {
            sequence: 0,
            source_amount: self.source_amount,
            min_destination_amount: self.min_destination_amount,
            frames: self.frames,
            is_fulfillable: self.is_fulfillable,
        }
    }
}

/// An outgoing packet. Filters may still adjust it on the way in; the sender consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacketRequest {
    /// Assigned by the sequence filter.
    pub sequence: u64,
    pub source_amount: u64,
    pub min_destination_amount: u64,
    pub frames: Vec<Frame>,
    pub is_fulfillable: bool,
}

impl StreamPacketRequest {
    /// A zero amount packet that can only be rejected, used to carry control frames.
    pub fn control(frames: Vec<Frame>) -> Self {
        Self {
            sequence: 0,
            source_amount: 0,
            min_destination_amount: 0,
            frames,
            is_fulfillable: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamPacketReply {
    pub response: IlpResponse,
    /// Present only if the payload decrypted with the shared secret.
    pub stream_packet: Option<StreamPacket>,
    /// Close frames the filters want sent when the connection is closed.
    pub queued_close_frames: Vec<Frame>,
}

impl StreamPacketReply {
    pub fn new(response: IlpResponse, stream_packet: Option<StreamPacket>) -> Self {
        Self {
            response,
            stream_packet,
            queued_close_frames: Vec::new(),
        }
    }

    /// Reject produced locally when the packet never reached the network,
    /// or the link failed before any response came back.
    pub fn local_reject(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            IlpResponse::Reject(IlpReject {
                code,
                triggered_by: None,
                message: message.into(),
                data: Bytes::new(),
            }),
            None,
        )
    }

    pub fn is_fulfill(&self) -> bool {
        self.response.is_fulfill()
    }

    pub fn is_reject(&self) -> bool {
        !self.is_fulfill()
    }

    pub fn reject_code(&self) -> Option<ErrorCode> {
        self.response.reject_code()
    }

    /// Whether the reply came from the receiver, as proven by the encrypted payload.
    pub fn is_authentic(&self) -> bool {
        self.stream_packet.is_some()
    }

    /// What the receiver claims it got, if the reply is authentic.
    pub fn destination_amount(&self) -> Option<u64> {
        self.stream_packet.as_ref().map(|packet| packet.prepare_amount)
    }

    pub fn frames(&self) -> &[Frame] {
        self.stream_packet
            .as_ref()
            .map(|packet| packet.frames.as_slice())
            .unwrap_or_default()
    }

    pub fn close_frame(&self) -> Option<&Frame> {
        self.stream_packet.as_ref().and_then(StreamPacket::close_frame)
    }

    pub fn queue_close(&mut self, frame: Frame) {
        self.queued_close_frames.push(frame);
    }
}
