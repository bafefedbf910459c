//! Simulated path and receiver shared by the integration tests.
//!
//! These utilities are shared across tests and may not all be used in every test file.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use stream_sender::crypto::{generate_fulfillment, sha256, AesGcmEncryptor, StreamEncryptor};
use stream_sender::error::{CodecError, LinkError};
use stream_sender::packet::{
    AmountTooLargeData, Denomination, ErrorCode, Frame, IlpAddress, IlpFulfill, IlpPacketType,
    IlpPrepare, IlpReject, IlpResponse, StreamErrorCode, StreamPacket, DEFAULT_STREAM_ID,
};
use stream_sender::{Link, SenderConfig, StreamConnection, StreamPacketCodec};

pub const SHARED_SECRET: [u8; 32] = *b"integration-test-shared-secret!!";

pub fn address(address: &str) -> IlpAddress {
    address.parse().expect("valid test address")
}

pub fn connection() -> StreamConnection {
    StreamConnection::new(
        address("test.sender"),
        address("test.receiver.abc"),
        &SHARED_SECRET,
    )
    .expect("valid credentials")
}

/// Fast pacing and short timeouts so a whole payment takes milliseconds.
pub fn fast_config() -> SenderConfig {
    SenderConfig {
        initial_packets_per_second: 1000,
        idle_timeout: std::time::Duration::from_millis(300),
        ..Default::default()
    }
}

pub fn usd() -> Denomination {
    Denomination::new("USD", 2)
}

pub struct JsonCodec;

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

#[derive(Debug, Clone)]
struct Behaviour {
    rate: (u64, u64),
    max_packet: Option<(u64, bool)>,
    asset: Option<Denomination>,
    /// Asset to claim once this many packets were fulfilled.
    switch_asset: Option<(u64, Denomination)>,
    /// Close the connection once this many packets were fulfilled.
    close_after: Option<u64>,
    /// Every packet is rejected by the connector with this code.
    connector_reject: Option<ErrorCode>,
}

/// One connector in front of a STREAM receiver.
///
/// The connector applies the exchange rate and the max packet amount; the
/// receiver fulfills any packet with a valid condition that meets its
/// minimum, reports what it received, and announces its asset.
pub struct SimulatedReceiver {
    behaviour: Mutex<Behaviour>,
    encryptor: AesGcmEncryptor,
    codec: JsonCodec,
    prepares: AtomicU64,
    fulfilled: AtomicU64,
    received: AtomicU64,
    largest_fulfilled: AtomicU64,
    close_codes: Mutex<Vec<StreamErrorCode>>,
}

impl SimulatedReceiver {
    pub fn new(numerator: u64, denominator: u64) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Mutex::new(Behaviour {
                rate: (numerator, denominator),
                max_packet: None,
                asset: Some(usd()),
                switch_asset: None,
                close_after: None,
                connector_reject: None,
            }),
            encryptor: AesGcmEncryptor::new(&SHARED_SECRET),
            codec: JsonCodec,
            prepares: AtomicU64::new(0),
            fulfilled: AtomicU64::new(0),
            received: AtomicU64::new(0),
            largest_fulfilled: AtomicU64::new(0),
            close_codes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_rate(&self, numerator: u64, denominator: u64) {
        self.behaviour.lock().rate = (numerator, denominator);
    }

    pub fn set_max_packet(&self, max: u64, with_data: bool) {
        self.behaviour.lock().max_packet = Some((max, with_data));
    }

    pub fn set_asset(&self, asset: Option<Denomination>) {
        self.behaviour.lock().asset = asset;
    }

    pub fn switch_asset_after(&self, fulfilled: u64, asset: Denomination) {
        self.behaviour.lock().switch_asset = Some((fulfilled, asset));
    }

    pub fn close_after(&self, fulfilled: u64) {
        self.behaviour.lock().close_after = Some(fulfilled);
    }

    pub fn reject_everything(&self, code: ErrorCode) {
        self.behaviour.lock().connector_reject = Some(code);
    }

    pub fn prepares(&self) -> u64 {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn fulfilled(&self) -> u64 {
        self.fulfilled.load(Ordering::SeqCst)
    }

    /// Destination units credited across all fulfilled packets.
    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn largest_fulfilled(&self) -> u64 {
        self.largest_fulfilled.load(Ordering::SeqCst)
    }

    /// Close codes of every `ConnectionClose` the sender delivered.
    pub fn close_codes(&self) -> Vec<StreamErrorCode> {
        self.close_codes.lock().clone()
    }

    fn reject(code: ErrorCode, triggered_by: &str, data: Bytes) -> IlpResponse {
        IlpResponse::Reject(IlpReject {
            code,
            triggered_by: Some(address(triggered_by)),
            message: String::new(),
            data,
        })
    }

    fn seal(&self, packet: &StreamPacket) -> Bytes {
        let encoded = self.codec.encode(packet).expect("encodable reply");
        self.encryptor.encrypt(&encoded).expect("encryptable reply")
    }

    fn respond(&self, prepare: IlpPrepare) -> IlpResponse {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.behaviour.lock().clone();

        if let Some(code) = behaviour.connector_reject {
            return Self::reject(code, "test.connector", Bytes::new());
        }
        if let Some((max, with_data)) = behaviour.max_packet {
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
                return Self::reject(ErrorCode::F08_AMOUNT_TOO_LARGE, "test.connector", data);
            }
        }

        let Some(request) = self
            .encryptor
            .decrypt(&prepare.data)
            .ok()
            .and_then(|plaintext| self.codec.decode(&plaintext).ok())
        else {
            return Self::reject(ErrorCode::F06_UNEXPECTED_PAYMENT, "test.receiver", Bytes::new());
        };
        for frame in &request.frames {
            if let Frame::ConnectionClose { code, .. } = frame {
                self.close_codes.lock().push(*code);
            }
        }

        let (numerator, denominator) = behaviour.rate;
        let received = u128::from(prepare.amount) * u128::from(numerator) / u128::from(denominator);
        let received = u64::try_from(received).unwrap_or(u64::MAX);

        let fulfilled_so_far = self.fulfilled();
        let asset = match &behaviour.switch_asset {
            Some((after, asset)) if fulfilled_so_far >= *after => Some(asset.clone()),
            _ => behaviour.asset.clone(),
        };
        let mut frames: Vec<Frame> = asset
            .map(|source_denomination| Frame::ConnectionAssetDetails {
                source_denomination,
            })
            .into_iter()
            .collect();
        if behaviour
            .close_after
            .is_some_and(|after| fulfilled_so_far >= after)
        {
            frames.push(Frame::StreamClose {
                stream_id: DEFAULT_STREAM_ID,
                code: StreamErrorCode::NoError,
                message: "receiver done".into(),
            });
        }

        let fulfillment = generate_fulfillment(&SHARED_SECRET, &prepare.data);
        let fulfillable = sha256(&fulfillment) == prepare.execution_condition;
        if !fulfillable || received < request.prepare_amount {
            let reply = StreamPacket {
                sequence: request.sequence,
                packet_type: IlpPacketType::Reject,
                prepare_amount: received,
                frames,
            };
            return Self::reject(
                ErrorCode::F99_APPLICATION_ERROR,
                "test.receiver",
                self.seal(&reply),
            );
        }

        self.fulfilled.fetch_add(1, Ordering::SeqCst);
        self.received.fetch_add(received, Ordering::SeqCst);
        self.largest_fulfilled
            .fetch_max(prepare.amount, Ordering::SeqCst);
        let reply = StreamPacket {
            sequence: request.sequence,
            packet_type: IlpPacketType::Fulfill,
            prepare_amount: received,
            frames,
        };
        IlpResponse::Fulfill(IlpFulfill {
            fulfillment,
            data: self.seal(&reply),
        })
    }
}

impl Link for SimulatedReceiver {
    fn send_packet(
        &self,
        prepare: IlpPrepare,
    ) -> impl Future<Output = Result<IlpResponse, LinkError>> + Send {
        let response = self.respond(prepare);
        async move {
            // let other packets interleave, as they would on a real link
            tokio::task::yield_now().await;
            Ok(response)
        }
    }
}
