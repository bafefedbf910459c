//! STREAM packet model. Encoding is delegated to a
//! [`StreamPacketCodec`](crate::link::StreamPacketCodec).

use serde::{Deserialize, Serialize};

use super::{Denomination, IlpAddress};

/// The money stream used for the payment.
pub const DEFAULT_STREAM_ID: u64 = 1;

/// Type of the ILP packet a STREAM packet travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IlpPacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamErrorCode {
    NoError = 0x01,
    InternalError = 0x02,
    EndpointBusy = 0x03,
    FlowControlError = 0x04,
    StreamIdError = 0x05,
    StreamStateError = 0x06,
    FrameFormatError = 0x07,
    ProtocolViolation = 0x08,
    ApplicationError = 0x09,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    ConnectionClose {
        code: StreamErrorCode,
        message: String,
    },
    ConnectionNewAddress {
        source_account: IlpAddress,
    },
    ConnectionAssetDetails {
        source_denomination: Denomination,
    },
    ConnectionMaxData {
        max_offset: u64,
    },
    StreamClose {
        stream_id: u64,
        code: StreamErrorCode,
        message: String,
    },
    StreamMoney {
        stream_id: u64,
        shares: u64,
    },
    StreamMaxMoney {
        stream_id: u64,
        receive_max: u64,
        total_received: u64,
    },
}

impl Frame {
    /// Close frames that end the payment: a connection close, or a close of the money stream.
    pub fn is_close(&self) -> bool {
        match self {
            Frame::ConnectionClose { .. } => true,
            Frame::StreamClose { stream_id, .. } => *stream_id == DEFAULT_STREAM_ID,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPacket {
    pub sequence: u64,
    pub packet_type: IlpPacketType,
    /// For requests, the minimum the receiver should accept; for replies, what it received.
    pub prepare_amount: u64,
    pub frames: Vec<Frame>,
}

impl StreamPacket {
    pub fn close_frame(&self) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.is_close())
    }
}
