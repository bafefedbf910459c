//! Packet vocabulary shared with the link, the codec and the receiver.

mod account;
pub(crate) mod ilp;
pub(crate) mod stream;

pub use account::{AccountDetails, Denomination, IlpAddress, MAX_ADDRESS_LENGTH};
pub use ilp::{
    AmountTooLargeData, ErrorClass, ErrorCode, IlpFulfill, IlpPrepare, IlpReject, IlpResponse,
};
pub use stream::{Frame, IlpPacketType, StreamErrorCode, StreamPacket, DEFAULT_STREAM_ID};
