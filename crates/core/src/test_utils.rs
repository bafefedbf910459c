//! In-process stand-ins for the link and codec, used by unit tests.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::connection::StreamConnection;
use crate::crypto::{generate_fulfillment, sha256, AesGcmEncryptor, StreamEncryptor};
use crate::error::{CodecError, LinkError};
use crate::link::{Link, StreamPacketCodec};
use crate::packet::{
    AmountTooLargeData, Denomination, ErrorCode, Frame, IlpAddress, IlpFulfill, IlpPacketType,
    IlpPrepare, IlpReject, IlpResponse, StreamPacket, DEFAULT_STREAM_ID,
};

pub(crate) const TEST_SECRET: [u8; 32] = [7; 32];

pub(crate) fn address(address: &str) -> IlpAddress {
    IlpAddress::new(address).unwrap()
}

pub(crate) fn test_connection() -> StreamConnection {
    StreamConnection::new(address("test.alice"), address("test.bob"), &TEST_SECRET).unwrap()
}

/// STREAM packets as JSON; the binary codec is not part of this crate.
pub(crate) struct JsonCodec;

impl StreamPacketCodec for JsonCodec {
    fn encode(&self, packet: &StreamPacket) -> Result<Bytes, CodecError> {
        serde_json::to_vec(packet)
            .map(Bytes::from)
            .map_err(|err| CodecError::Invalid(err.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<StreamPacket, CodecError> {
        serde_json::from_slice(data).map_err(|err| CodecError::Invalid(err.to_string()))
    }
}

/// A receiver behind a single connector, answering synchronously.
///
/// The connector converts at `rate_numerator / rate_denominator` and rejects
/// anything above `max_packet` with F08. The receiver fulfills every packet
/// that carries a valid condition and meets its minimum.
pub(crate) struct ScriptedReceiver {
    rate_numerator: u64,
    rate_denominator: u64,
    max_packet: Option<(u64, bool)>,
    asset: Option<Denomination>,
    receive_max: Option<u64>,
    connected: bool,
    encryptor: AesGcmEncryptor,
    prepares: AtomicU64,
    received: AtomicU64,
}

impl ScriptedReceiver {
    pub(crate) fn with_rate(numerator: u64, denominator: u64) -> Self {
        Self {
            rate_numerator: numerator,
            rate_denominator: denominator,
            max_packet: None,
            asset: None,
            receive_max: None,
            connected: true,
            encryptor: AesGcmEncryptor::new(&TEST_SECRET),
            prepares: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    pub(crate) fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Reject packets above `max` with F08, carrying amount metadata if `with_data`.
    pub(crate) fn with_max_packet(mut self, max: u64, with_data: bool) -> Self {
        self.max_packet = Some((max, with_data));
        self
    }

    pub(crate) fn with_asset(mut self, asset: Denomination) -> Self {
        self.asset = Some(asset);
        self
    }

    pub(crate) fn with_receive_max(mut self, receive_max: u64) -> Self {
        self.receive_max = Some(receive_max);
        self
    }

    pub(crate) fn prepares(&self) -> u64 {
        self.prepares.load(Ordering::SeqCst)
    }

    /// Destination units credited by fulfilled packets.
    pub(crate) fn total_received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    fn seal(&self, packet: &StreamPacket) -> Bytes {
        let encoded = JsonCodec.encode(packet).unwrap();
        self.encryptor.encrypt(&encoded).unwrap()
    }

    fn respond(&self, prepare: IlpPrepare) -> Result<IlpResponse, LinkError> {
        if !self.connected {
            return Err(LinkError::Disconnected);
        }
        self.prepares.fetch_add(1, Ordering::SeqCst);

        if let Some((max, with_data)) = self.max_packet {
            if prepare.amount > max {
                let data = if with_data {
                    AmountTooLargeData {
                        received_amount: prepare.amount,
                        maximum_amount: max,
                    }
                    .encode()
                } else {
                    Bytes::new()
                };
                return Ok(IlpResponse::Reject(IlpReject {
                    code: ErrorCode::F08_AMOUNT_TOO_LARGE,
                    triggered_by: Some(address("test.connector")),
                    message: String::new(),
                    data,
                }));
            }
        }

        let Some(request) = self
            .encryptor
            .decrypt(&prepare.data)
            .ok()
            .and_then(|plaintext| JsonCodec.decode(&plaintext).ok())
        else {
            return Ok(IlpResponse::Reject(IlpReject {
                code: ErrorCode::F06_UNEXPECTED_PAYMENT,
                triggered_by: Some(address("test.bob")),
                message: String::new(),
                data: Bytes::new(),
            }));
        };

        let received = u128::from(prepare.amount) * u128::from(self.rate_numerator)
            / u128::from(self.rate_denominator);
        let received = u64::try_from(received).unwrap_or(u64::MAX);

        let mut frames = Vec::new();
        let announced = request
            .frames
            .iter()
            .any(|frame| matches!(frame, Frame::ConnectionNewAddress { .. }));
        if announced {
            if let Some(asset) = &self.asset {
                frames.push(Frame::ConnectionAssetDetails {
                    source_denomination: asset.clone(),
                });
            }
        }
        if let Some(receive_max) = self.receive_max {
            frames.push(Frame::StreamMaxMoney {
                stream_id: DEFAULT_STREAM_ID,
                receive_max,
                total_received: 0,
            });
        }

        let fulfillment = generate_fulfillment(&TEST_SECRET, &prepare.data);
        let fulfillable = sha256(&fulfillment) == prepare.execution_condition;
        if !fulfillable || received < request.prepare_amount {
            let reply = StreamPacket {
                sequence: request.sequence,
                packet_type: IlpPacketType::Reject,
                prepare_amount: received,
                frames,
            };
            return Ok(IlpResponse::Reject(IlpReject {
                code: ErrorCode::F99_APPLICATION_ERROR,
                triggered_by: Some(address("test.bob")),
                message: String::new(),
                data: self.seal(&reply),
            }));
        }

        self.received.fetch_add(received, Ordering::SeqCst);
        let reply = StreamPacket {
            sequence: request.sequence,
            packet_type: IlpPacketType::Fulfill,
            prepare_amount: received,
            frames,
        };
        Ok(IlpResponse::Fulfill(IlpFulfill {
            fulfillment,
            data: self.seal(&reply),
        }))
    }
}

impl Link for ScriptedReceiver {
    fn send_packet(
        &self,
        prepare: IlpPrepare,
    ) -> impl std::future::Future<Output = Result<IlpResponse, LinkError>> + Send {
        futures::future::ready(self.respond(prepare))
    }
}
