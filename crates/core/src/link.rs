//! Collaborators the sender consumes but does not implement: the transport
//! that carries ILP packets and the codec for STREAM payloads.

use std::future::Future;

use bytes::Bytes;

use crate::error::{CodecError, LinkError};
use crate::packet::{IlpPrepare, IlpResponse, StreamPacket};

/// Sends one ILP Prepare and resolves with the Fulfill or Reject that answers it.
pub trait Link: Send + Sync + 'static {
    fn send_packet(
        &self,
        prepare: IlpPrepare,
    ) -> impl Future<Output = Result<IlpResponse, LinkError>> + Send;
}

pub trait StreamPacketCodec: Send + Sync + 'static {
    fn encode(&self, packet: &StreamPacket) -> Result<Bytes, CodecError>;
    fn decode(&self, data: &[u8]) -> Result<StreamPacket, CodecError>;
}
