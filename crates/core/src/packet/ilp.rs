//! ILP Prepare/Fulfill/Reject values exchanged with the link.
//!
//! The OER wire codec for these packets lives outside this crate; the only
//! binary layout handled here is the F08 reject data, which the max packet
//! tracker must interpret.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use super::IlpAddress;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Final,
    Temporary,
    Relative,
}

/// Three character ILP error code, e.g. `F08`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct ErrorCode([u8; 3]);

impl ErrorCode {
    pub const F00_BAD_REQUEST: Self = Self(*b"F00");
    pub const F01_INVALID_PACKET: Self = Self(*b"F01");
    pub const F02_UNREACHABLE: Self = Self(*b"F02");
    pub const F03_INVALID_AMOUNT: Self = Self(*b"F03");
    pub const F04_INSUFFICIENT_DESTINATION_AMOUNT: Self = Self(*b"F04");
    pub const F05_WRONG_CONDITION: Self = Self(*b"F05");
    pub const F06_UNEXPECTED_PAYMENT: Self = Self(*b"F06");
    pub const F07_CANNOT_RECEIVE: Self = Self(*b"F07");
    pub const F08_AMOUNT_TOO_LARGE: Self = Self(*b"F08");
    pub const F99_APPLICATION_ERROR: Self = Self(*b"F99");
    pub const T00_INTERNAL_ERROR: Self = Self(*b"T00");
    pub const T01_PEER_UNREACHABLE: Self = Self(*b"T01");
    pub const T02_PEER_BUSY: Self = Self(*b"T02");
    pub const T03_CONNECTOR_BUSY: Self = Self(*b"T03");
    pub const T04_INSUFFICIENT_LIQUIDITY: Self = Self(*b"T04");
    pub const T05_RATE_LIMITED: Self = Self(*b"T05");
    pub const T99_APPLICATION_ERROR: Self = Self(*b"T99");
    pub const R00_TRANSFER_TIMED_OUT: Self = Self(*b"R00");
    pub const R01_INSUFFICIENT_SOURCE_AMOUNT: Self = Self(*b"R01");
    pub const R02_INSUFFICIENT_TIMEOUT: Self = Self(*b"R02");
    pub const R99_APPLICATION_ERROR: Self = Self(*b"R99");

    pub fn class(&self) -> ErrorClass {
        match self.0[0] {
            b'T' => ErrorClass::Temporary,
            b'R' => ErrorClass::Relative,
            _ => ErrorClass::Final,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.class() == ErrorClass::Temporary
    }

    pub fn as_str(&self) -> &str {
        // constructed only from ASCII
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for ErrorCode {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 3] = s
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::Invalid(format!("error code `{s}` is not 3 bytes")))?;
        if !matches!(bytes[0], b'F' | b'T' | b'R')
            || !bytes[1..].iter().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(CodecError::Invalid(format!("malformed error code `{s}`")));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlpPrepare {
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub execution_condition: [u8; 32],
    pub destination: IlpAddress,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlpFulfill {
    pub fulfillment: [u8; 32],
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlpReject {
    pub code: ErrorCode,
    pub triggered_by: Option<IlpAddress>,
    pub message: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IlpResponse {
    Fulfill(IlpFulfill),
    Reject(IlpReject),
}

impl IlpResponse {
    pub fn data(&self) -> &Bytes {
        match self {
            IlpResponse::Fulfill(fulfill) => &fulfill.data,
            IlpResponse::Reject(reject) => &reject.data,
        }
    }

    pub fn is_fulfill(&self) -> bool {
        matches!(self, IlpResponse::Fulfill(_))
    }

    pub fn reject(&self) -> Option<&IlpReject> {
        match self {
            IlpResponse::Reject(reject) => Some(reject),
            IlpResponse::Fulfill(_) => None,
        }
    }

    pub fn reject_code(&self) -> Option<ErrorCode> {
        self.reject().map(|reject| reject.code)
    }
}

/// Data carried by an F08 reject: what the rejecting hop received and the most it accepts.
///
/// Layout: `received_amount: u64 BE || maximum_amount: u64 BE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountTooLargeData {
    pub received_amount: u64,
    pub maximum_amount: u64,
}

impl AmountTooLargeData {
    pub const ENCODED_LEN: usize = 16;

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::ENCODED_LEN {
            return Err(CodecError::UnexpectedEof {
                needed: Self::ENCODED_LEN,
                available: data.len(),
            });
        }
        Ok(Self {
            received_amount: BigEndian::read_u64(&data[..8]),
            maximum_amount: BigEndian::read_u64(&data[8..16]),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = [0u8; Self::ENCODED_LEN];
        BigEndian::write_u64(&mut buf[..8], self.received_amount);
        BigEndian::write_u64(&mut buf[8..], self.maximum_amount);
        Bytes::copy_from_slice(&buf)
    }
}
