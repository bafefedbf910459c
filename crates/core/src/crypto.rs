//! Key schedule and authenticated encryption for STREAM payloads.
//!
//! Both keys are derived from the connection's 32 byte shared secret:
//!
//! - encryption key: `HMAC-SHA256(secret, "ilp_stream_encryption")`
//! - fulfillment key: `HMAC-SHA256(secret, "ilp_stream_fulfillment")`
//!
//! Payloads are sealed with AES-256-GCM and laid out as
//! `nonce (12) || tag (16) || ciphertext`.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rand::{thread_rng, Rng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

const ENCRYPTION_KEY_STRING: &[u8] = b"ilp_stream_encryption";
const FULFILLMENT_GENERATION_STRING: &[u8] = b"ilp_stream_fulfillment";

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Seals and opens STREAM packet payloads for one connection.
pub trait StreamEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

pub fn hmac_sha256(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    // keys shorter than the SHA-256 block are zero padded by HMAC itself
    let mut block = [0u8; 64];
    block[..32].copy_from_slice(key);
    let mut mac = <HmacSha256 as KeyInit>::new(GenericArray::from_slice(&block));
    mac.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Fulfillment the receiver will produce for a Prepare carrying `data`.
pub fn generate_fulfillment(shared_secret: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let key = hmac_sha256(shared_secret, FULFILLMENT_GENERATION_STRING);
    hmac_sha256(&key, data)
}

pub fn generate_condition(shared_secret: &[u8; 32], data: &[u8]) -> [u8; 32] {
    sha256(&generate_fulfillment(shared_secret, data))
}

/// A condition with no known preimage, so the packet can only be rejected.
pub fn random_condition() -> [u8; 32] {
    let mut condition = [0u8; 32];
    thread_rng().fill_bytes(&mut condition);
    condition
}

pub struct AesGcmEncryptor {
    cipher: Aes256Gcm,
}

impl AesGcmEncryptor {
    pub fn new(shared_secret: &[u8; 32]) -> Self {
        let key = hmac_sha256(shared_secret, ENCRYPTION_KEY_STRING);
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(&key)),
        }
    }
}

impl StreamEncryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes, CryptoError> {
        let nonce: [u8; NONCE_SIZE] = thread_rng().gen();
        let mut buffer = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + plaintext.len());
        buffer.extend_from_slice(&nonce);
        buffer.extend_from_slice(&[0u8; TAG_SIZE]);
        buffer.extend_from_slice(plaintext);

        let tag = self
            .cipher
            .encrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &[],
                &mut buffer[NONCE_SIZE + TAG_SIZE..],
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;
        buffer[NONCE_SIZE..NONCE_SIZE + TAG_SIZE].copy_from_slice(&tag);
        Ok(Bytes::from(buffer))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::CiphertextTooShort(ciphertext.len()));
        }
        let nonce = GenericArray::from_slice(&ciphertext[..NONCE_SIZE]);
        let tag = GenericArray::from_slice(&ciphertext[NONCE_SIZE..NONCE_SIZE + TAG_SIZE]);
        let mut buffer = ciphertext[NONCE_SIZE + TAG_SIZE..].to_vec();
        self.cipher
            .decrypt_in_place_detached(nonce, &[], &mut buffer, tag)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(buffer)
    }
}
