use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Payload kind, detected from the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Ok,
    Err,
    Eof,
    ResultData,
}

pub fn detect_payload_kind(payload: &[u8]) -> Result<PayloadKind> {
    match payload.first() {
        None => Err(Error::InvalidPacket),
        Some(0x00) => Ok(PayloadKind::Ok),
        Some(0xFF) => Ok(PayloadKind::Err),
        Some(0xFE) if payload.len() < 9 => Ok(PayloadKind::Eof),
        Some(_) => Ok(PayloadKind::ResultData),
    }
}

/// Unparsed OK payload (0x00, or 0xFE legacy OK).
#[derive(Debug, Clone, Copy)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

/// Unparsed ERR payload (0xFF).
#[derive(Debug, Clone, Copy)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

/// Parsed OK payload
#[derive(Debug, Clone)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
}

impl TryFrom<OkPayloadBytes<'_>> for OkPayload {
    type Error = Error;

    fn try_from(bytes: OkPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_u8(bytes.0)?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::InvalidPacket);
        }

        let (affected_rows, rest) = read_lenenc_int(data)?;
        let (last_insert_id, rest) = read_lenenc_int(rest)?;
        let (status_flags, rest) = read_u16(rest)?;
        let (warnings, _info) = read_u16(rest)?;

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_truncate(status_flags),
            warnings,
        })
    }
}

/// Parsed ERR payload
#[derive(Debug, Clone, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_u8(bytes.0)?;
        if header != 0xFF {
            return Err(Error::InvalidPacket);
        }

        let (error_code, data) = read_u16(data)?;

        // Optional '#'-prefixed 5-byte SQL state
        let (sql_state, rest) = if data.first() == Some(&b'#') {
            let (state_bytes, rest) = read_bytes_fixed(&data[1..], 5)?;
            (String::from_utf8_lossy(state_bytes).to_string(), rest)
        } else {
            (String::new(), data)
        };

        let message = String::from_utf8_lossy(rest).to_string();

        Ok(ErrPayload {
            error_code,
            sql_state,
            message,
        })
    }
}

/// EOF payload body after the 0xFE header byte (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPayload {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPayload {
    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_truncate(self.status_flags.get())
    }
}

pub fn read_eof_payload(payload: &[u8]) -> Result<&EofPayload> {
    let (header, data) = read_u8(payload)?;
    if header != 0xFE || data.len() < 4 {
        return Err(Error::InvalidPacket);
    }
    EofPayload::ref_from_bytes(&data[..4]).map_err(|_| Error::InvalidPacket)
}
