//! Compressed-protocol framing.
//!
//! Once compression is negotiated, everything after the handshake travels in
//! compressed frames: `compressed_length:3LE || sequence_id:1 ||
//! uncompressed_length:3LE` followed by either a zlib stream (CMF/FLG header,
//! deflate body, Adler-32 trailer) or, when `uncompressed_length == 0`, the
//! raw bytes. The frame stream keeps its own sequence counter, separate from
//! the logical packet counter.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::{MAX_PACKET_SIZE, MIN_COMPRESS_LENGTH};
use crate::error::{Error, Result};
use crate::protocol::packet::Conversation;

pub const COMPRESSED_HEADER_LEN: usize = 7;

/// Compressed frame header (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct CompressedHeader {
    pub compressed_length: [u8; 3],
    pub sequence_id: u8,
    pub uncompressed_length: [u8; 3],
}

impl CompressedHeader {
    pub fn encode(compressed_length: usize, sequence_id: u8, uncompressed_length: usize) -> Self {
        let clen = u32::to_le_bytes(compressed_length as u32);
        let ulen = u32::to_le_bytes(uncompressed_length as u32);
        Self {
            compressed_length: [clen[0], clen[1], clen[2]],
            sequence_id,
            uncompressed_length: [ulen[0], ulen[1], ulen[2]],
        }
    }

    pub fn compressed_length(&self) -> usize {
        u32::from_le_bytes([
            self.compressed_length[0],
            self.compressed_length[1],
            self.compressed_length[2],
            0,
        ]) as usize
    }

    pub fn uncompressed_length(&self) -> usize {
        u32::from_le_bytes([
            self.uncompressed_length[0],
            self.uncompressed_length[1],
            self.uncompressed_length[2],
            0,
        ]) as usize
    }
}

/// Sequencing and encode/decode of the compressed frame stream.
///
/// Owns no socket; the transport feeds it frame bytes and takes wire bytes.
#[derive(Debug, Default)]
pub struct CompressedFramer {
    conversation: Conversation,
}

impl CompressedFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the frame counter at the start of a new conversation.
    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    /// The sequence id the next frame will carry (or the one the logical
    /// stream must resync to after a frame was read).
    pub fn sequence(&self) -> u8 {
        self.conversation.peek()
    }

    /// Validate an incoming frame's sequence id.
    pub fn accept(&mut self, received: u8) -> Result<()> {
        self.conversation.accept(received)
    }

    /// Frame already packet-framed wire bytes into compressed frames.
    ///
    /// Units of at most the maximum packet size are framed independently;
    /// small units and units that deflate poorly are sent raw with the
    /// `uncompressed_length = 0` sentinel.
    pub fn write_frames(&mut self, out: &mut Vec<u8>, mut wire: &[u8]) -> Result<()> {
        loop {
            let unit_len = wire.len().min(MAX_PACKET_SIZE);
            let (unit, rest) = wire.split_at(unit_len);
            wire = rest;

            if unit.len() <= MIN_COMPRESS_LENGTH {
                self.write_raw_frame(out, unit);
            } else {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(unit)?;
                let compressed = encoder.finish()?;
                if compressed.len() < unit.len() {
                    let header =
                        CompressedHeader::encode(compressed.len(), self.conversation.next(), unit.len());
                    out.extend_from_slice(header.as_bytes());
                    out.extend_from_slice(&compressed);
                } else {
                    self.write_raw_frame(out, unit);
                }
            }

            if wire.is_empty() {
                return Ok(());
            }
        }
    }

    fn write_raw_frame(&mut self, out: &mut Vec<u8>, unit: &[u8]) {
        let header = CompressedHeader::encode(unit.len(), self.conversation.next(), 0);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(unit);
    }

    /// Decode one frame body into `out`, validating the zlib envelope.
    pub fn decode_frame(header: &CompressedHeader, body: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if body.len() != header.compressed_length() {
            return Err(Error::CorruptCompression("frame body length mismatch"));
        }

        let uncompressed_length = header.uncompressed_length();
        if uncompressed_length == 0 {
            out.extend_from_slice(body);
            return Ok(());
        }

        let [cmf, flg, ..] = body else {
            return Err(Error::CorruptCompression("frame too short for zlib header"));
        };
        // CMF: deflate method, 32K window. FLG: check bits valid, no preset
        // dictionary.
        if cmf & 0x0F != 0x08 {
            return Err(Error::CorruptCompression("zlib CMF is not deflate"));
        }
        if (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 != 0 {
            return Err(Error::CorruptCompression("zlib FLG check bits invalid"));
        }
        if flg & 0x20 != 0 {
            return Err(Error::CorruptCompression("unexpected zlib preset dictionary"));
        }

        let start = out.len();
        out.reserve(uncompressed_length);
        let mut decoder = ZlibDecoder::new(body);
        decoder
            .read_to_end(out)
            .map_err(|_| Error::CorruptCompression("inflate or Adler-32 check failed"))?;

        if out.len() - start != uncompressed_length {
            return Err(Error::CorruptCompression("inflated length mismatch"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adler32(data: &[u8]) -> u32 {
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in data {
            a = (a + u32::from(byte)) % 65521;
            b = (b + a) % 65521;
        }
        (b << 16) | a
    }

    fn decode_all(mut wire: &[u8], framer: &mut CompressedFramer) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while !wire.is_empty() {
            let (header, rest) =
                CompressedHeader::read_from_prefix(wire).map_err(|_| Error::InvalidPacket)?;
            framer.accept(header.sequence_id)?;
            let (body, rest) = rest.split_at(header.compressed_length());
            CompressedFramer::decode_frame(&header, body, &mut out)?;
            wire = rest;
        }
        Ok(out)
    }

    #[test]
    fn test_small_payload_sent_raw() {
        let payload = vec![7u8; MIN_COMPRESS_LENGTH];
        let mut framer = CompressedFramer::new();
        let mut wire = Vec::new();
        framer.write_frames(&mut wire, &payload).unwrap();

        let (header, _) = CompressedHeader::read_from_prefix(&wire).unwrap();
        assert_eq!(header.uncompressed_length(), 0);
        assert_eq!(header.compressed_length(), payload.len());

        let mut reader = CompressedFramer::new();
        assert_eq!(decode_all(&wire, &mut reader).unwrap(), payload);
    }

    #[test]
    fn test_large_payload_round_trip() {
        // Compressible content well above the threshold
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let mut framer = CompressedFramer::new();
        let mut wire = Vec::new();
        framer.write_frames(&mut wire, &payload).unwrap();

        let (header, body) = CompressedHeader::read_from_prefix(&wire).unwrap();
        assert_eq!(header.uncompressed_length(), payload.len());
        assert!(header.compressed_length() < payload.len());

        // zlib envelope: CMF/FLG header and Adler-32 trailer over the
        // decompressed bytes
        assert_eq!(body[0] & 0x0F, 0x08);
        let trailer = u32::from_be_bytes(body[body.len() - 4..].try_into().unwrap());
        assert_eq!(trailer, adler32(&payload));

        let mut reader = CompressedFramer::new();
        assert_eq!(decode_all(&wire, &mut reader).unwrap(), payload);
    }

    #[test]
    fn test_corrupt_cmf_rejected() {
        let payload = vec![1u8; 1024];
        let mut framer = CompressedFramer::new();
        let mut wire = Vec::new();
        framer.write_frames(&mut wire, &payload).unwrap();

        wire[COMPRESSED_HEADER_LEN] = 0x1F; // not deflate
        let mut reader = CompressedFramer::new();
        assert!(matches!(
            decode_all(&wire, &mut reader),
            Err(Error::CorruptCompression(_))
        ));
    }

    #[test]
    fn test_corrupt_checksum_rejected() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 13) as u8).collect();
        let mut framer = CompressedFramer::new();
        let mut wire = Vec::new();
        framer.write_frames(&mut wire, &payload).unwrap();

        let last = wire.len() - 1;
        wire[last] ^= 0xFF; // flip a trailer byte
        let mut reader = CompressedFramer::new();
        assert!(matches!(
            decode_all(&wire, &mut reader),
            Err(Error::CorruptCompression(_))
        ));
    }

    #[test]
    fn test_frame_sequence_gap_rejected() {
        let payload = vec![1u8; 16];
        let mut framer = CompressedFramer::new();
        framer.conversation.resync(5);
        let mut wire = Vec::new();
        framer.write_frames(&mut wire, &payload).unwrap();

        let mut reader = CompressedFramer::new();
        assert!(matches!(
            decode_all(&wire, &mut reader),
            Err(Error::PacketOutOfOrder {
                expected: 0,
                received: 5
            })
        ));
    }
}
