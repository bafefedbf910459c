//! Turns a [`StreamPacketRequest`] into an ILP Prepare and the response into a
//! [`StreamPacketReply`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::PacketSender;
use crate::connection::StreamConnection;
use crate::crypto::{generate_fulfillment, random_condition, sha256};
use crate::error::{LinkError, PrepareError};
use crate::link::{Link, StreamPacketCodec};
use crate::packet::{ErrorCode, IlpPacketType, IlpPrepare, IlpResponse, StreamPacket};
use crate::request::{StreamPacketReply, StreamPacketRequest};

pub struct StreamPacketSender<L, C> {
    link: Arc<L>,
    codec: Arc<C>,
    connection: Arc<StreamConnection>,
    packet_expiry: Duration,
}

impl<L: Link, C: StreamPacketCodec> StreamPacketSender<L, C> {
    pub fn new(
        link: Arc<L>,
        codec: Arc<C>,
        connection: Arc<StreamConnection>,
        packet_expiry: Duration,
    ) -> Self {
        Self {
            link,
            codec,
            connection,
            packet_expiry,
        }
    }

    fn prepare(
        &self,
        request: &StreamPacketRequest,
    ) -> Result<(IlpPrepare, Option<[u8; 32]>), PrepareError> {
        let packet = StreamPacket {
            sequence: request.sequence,
            packet_type: IlpPacketType::Prepare,
            prepare_amount: request.min_destination_amount,
            frames: request.frames.clone(),
        };
        let encoded = self.codec.encode(&packet)?;
        let data = self.connection.encryptor().encrypt(&encoded)?;

        let (execution_condition, fulfillment) = if request.is_fulfillable {
            let fulfillment = generate_fulfillment(self.connection.shared_secret(), &data);
            (sha256(&fulfillment), Some(fulfillment))
        } else {
            (random_condition(), None)
        };
        let expiry = chrono::Duration::from_std(self.packet_expiry)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let prepare = IlpPrepare {
            amount: request.source_amount,
            expires_at: Utc::now() + expiry,
            execution_condition,
            destination: self.connection.destination_address().clone(),
            data,
        };
        Ok((prepare, fulfillment))
    }
}

/// Decrypt and decode the receiver's payload; `None` if it is not an
/// authentic answer to `sequence`.
fn open_reply<C: StreamPacketCodec>(
    connection: &StreamConnection,
    codec: &C,
    response: &IlpResponse,
    sequence: u64,
) -> Option<StreamPacket> {
    let data = response.data();
    if data.is_empty() {
        return None;
    }
    let plaintext = match connection.encryptor().decrypt(data) {
        Ok(plaintext) => plaintext,
        Err(error) => {
            tracing::debug!(%error, sequence, "reply payload is not from the receiver");
            return None;
        }
    };
    let packet = match codec.decode(&plaintext) {
        Ok(packet) => packet,
        Err(error) => {
            tracing::debug!(%error, sequence, "failed to decode reply payload");
            return None;
        }
    };
    let expected_type = if response.is_fulfill() {
        IlpPacketType::Fulfill
    } else {
        IlpPacketType::Reject
    };
    if packet.sequence != sequence || packet.packet_type != expected_type {
        tracing::debug!(
            sequence,
            reply_sequence = packet.sequence,
            reply_type = ?packet.packet_type,
            "reply does not match the request"
        );
        return None;
    }
    Some(packet)
}

impl<L: Link, C: StreamPacketCodec> PacketSender for StreamPacketSender<L, C> {
    fn send(&self, request: StreamPacketRequest) -> BoxFuture<'static, StreamPacketReply> {
        let link = self.link.clone();
        let codec = self.codec.clone();
        let connection = self.connection.clone();
        let packet_expiry = self.packet_expiry;
        let prepared = self.prepare(&request);

        async move {
            let (prepare, fulfillment) = match prepared {
                Ok(prepared) => prepared,
                Err(error) => {
                    tracing::error!(sequence = request.sequence, %error, "could not build packet");
                    return StreamPacketReply::local_reject(
                        ErrorCode::T00_INTERNAL_ERROR,
                        error.to_string(),
                    );
                }
            };
            tracing::trace!(
                sequence = request.sequence,
                amount = prepare.amount,
                fulfillable = request.is_fulfillable,
                "sending prepare"
            );

            let response = tokio::time::timeout(packet_expiry, link.send_packet(prepare))
                .await
                .unwrap_or(Err(LinkError::Timeout(packet_expiry)));
            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(
                        %error,
                        sequence = request.sequence,
                        "link failed to send packet"
                    );
                    return StreamPacketReply::local_reject(
                        ErrorCode::T00_INTERNAL_ERROR,
                        error.to_string(),
                    );
                }
            };

            if let IlpResponse::Fulfill(fulfill) = &response {
                if fulfillment != Some(fulfill.fulfillment) {
                    tracing::warn!(
                        sequence = request.sequence,
                        "fulfillment does not match the condition"
                    );
                    return StreamPacketReply::local_reject(
                        ErrorCode::F05_WRONG_CONDITION,
                        "invalid fulfillment",
                    );
                }
            }

            let stream_packet =
                open_reply(&connection, codec.as_ref(), &response, request.sequence);
            StreamPacketReply::new(response, stream_packet)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::test_utils::{test_connection, JsonCodec, ScriptedReceiver};

    fn sender_with_codec<C: StreamPacketCodec>(
        receiver: ScriptedReceiver,
        codec: C,
    ) -> (StreamPacketSender<ScriptedReceiver, C>, Arc<StreamConnection>) {
        let connection = Arc::new(test_connection());
        (
            StreamPacketSender::new(
                Arc::new(receiver),
                Arc::new(codec),
                connection.clone(),
                Duration::from_secs(30),
            ),
            connection,
        )
    }

    fn sender(
        receiver: ScriptedReceiver,
    ) -> (StreamPacketSender<ScriptedReceiver, JsonCodec>, Arc<StreamConnection>) {
        sender_with_codec(receiver, JsonCodec)
    }

    struct BrokenCodec;

    impl StreamPacketCodec for BrokenCodec {
        fn encode(&self, _packet: &StreamPacket) -> Result<bytes::Bytes, CodecError> {
            Err(CodecError::Invalid("frame too large".into()))
        }

        fn decode(&self, _data: &[u8]) -> Result<StreamPacket, CodecError> {
            Err(CodecError::Invalid("unused".into()))
        }
    }

    fn request(sequence: u64, amount: u64, fulfillable: bool) -> StreamPacketRequest {
        StreamPacketRequest {
            sequence,
            source_amount: amount,
            min_destination_amount: amount,
            frames: vec![],
            is_fulfillable: fulfillable,
        }
    }

    #[tokio::test]
    async fn fulfillable_packet_is_fulfilled_with_authentic_reply() {
        let (sender, _) = sender(ScriptedReceiver::with_rate(2, 1));
        let reply = sender.send(request(1, 10, true)).await;
        assert!(reply.is_fulfill());
        assert!(reply.is_authentic());
        assert_eq!(reply.destination_amount(), Some(20));
    }

    #[tokio::test]
    async fn unfulfillable_packet_is_rejected_but_reports_amount() {
        let (sender, _) = sender(ScriptedReceiver::with_rate(2, 1));
        let reply = sender.send(request(1, 10, false)).await;
        assert_eq!(reply.reject_code(), Some(ErrorCode::F99_APPLICATION_ERROR));
        assert_eq!(reply.destination_amount(), Some(20));
    }

    #[tokio::test]
    async fn link_failure_becomes_local_reject() {
        let (sender, _) = sender(ScriptedReceiver::with_rate(1, 1).disconnected());
        let reply = sender.send(request(1, 10, true)).await;
        assert_eq!(reply.reject_code(), Some(ErrorCode::T00_INTERNAL_ERROR));
        assert!(!reply.is_authentic());
    }

    #[tokio::test]
    async fn unencodable_packet_is_rejected_locally() {
        let receiver = ScriptedReceiver::with_rate(1, 1);
        let (sender, _) = sender_with_codec(receiver, BrokenCodec);
        let reply = sender.send(request(1, 10, true)).await;
        assert_eq!(reply.reject_code(), Some(ErrorCode::T00_INTERNAL_ERROR));
        assert_eq!(
            reply.response.reject().map(|reject| reject.message.as_str()),
            Some("failed to encode stream packet: invalid packet: frame too large")
        );
    }

    #[tokio::test]
    async fn connector_reject_is_not_authentic() {
        let (sender, _) = sender(ScriptedReceiver::with_rate(1, 1).with_max_packet(5, true));
        let reply = sender.send(request(1, 10, true)).await;
        assert_eq!(reply.reject_code(), Some(ErrorCode::F08_AMOUNT_TOO_LARGE));
        assert!(!reply.is_authentic());
    }
}
