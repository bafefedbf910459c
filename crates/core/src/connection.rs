//! Per-payment connection state: the endpoints, the shared secret and the
//! sequence counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::crypto::{AesGcmEncryptor, StreamEncryptor};
use crate::error::PaymentError;
use crate::packet::IlpAddress;

/// Sequence numbers must stay strictly below this value.
pub const SEQUENCE_LIMIT: u64 = 1 << 32;

pub const SHARED_SECRET_LEN: usize = 32;

pub struct StreamConnection {
    source_address: IlpAddress,
    destination_address: IlpAddress,
    shared_secret: [u8; SHARED_SECRET_LEN],
    encryptor: Arc<dyn StreamEncryptor>,
    next_sequence: AtomicU64,
}

impl StreamConnection {
    /// Fails with [`PaymentError::InvalidCredentials`] unless the secret is 32 bytes.
    pub fn new(
        source_address: IlpAddress,
        destination_address: IlpAddress,
        shared_secret: &[u8],
    ) -> Result<Self, PaymentError> {
        let shared_secret: [u8; SHARED_SECRET_LEN] = shared_secret
            .try_into()
            .map_err(|_| PaymentError::InvalidCredentials)?;
        Ok(Self {
            source_address,
            destination_address,
            encryptor: Arc::new(AesGcmEncryptor::new(&shared_secret)),
            shared_secret,
            next_sequence: AtomicU64::new(1),
        })
    }

    pub fn with_encryptor(mut self, encryptor: Arc<dyn StreamEncryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    /// Resume a connection whose earlier packets already consumed sequence numbers.
    pub fn with_next_sequence(self, sequence: u64) -> Self {
        self.next_sequence.store(sequence, Ordering::SeqCst);
        self
    }

    pub fn source_address(&self) -> &IlpAddress {
        &self.source_address
    }

    pub fn destination_address(&self) -> &IlpAddress {
        &self.destination_address
    }

    pub fn shared_secret(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.shared_secret
    }

    pub fn encryptor(&self) -> Arc<dyn StreamEncryptor> {
        self.encryptor.clone()
    }

    /// The sequence the next packet would use, without consuming it.
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    pub fn is_sequence_exhausted(&self) -> bool {
        self.peek_sequence() >= SEQUENCE_LIMIT
    }

    /// Claims the next sequence number. Never hands out the same value twice.
    pub fn next_sequence(&self) -> Result<u64, PaymentError> {
        self.next_sequence
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |sequence| {
                (sequence < SEQUENCE_LIMIT).then_some(sequence + 1)
            })
            .map_err(|_| PaymentError::ExceededMaxSequence)
    }
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("source_address", &self.source_address)
            .field("destination_address", &self.destination_address)
            .field("next_sequence", &self.peek_sequence())
            .finish_non_exhaustive()
    }
}
