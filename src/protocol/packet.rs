use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PACKET_SIZE;
use crate::error::{Error, Result};

/// Packet header (zero-copy)
///
/// Layout matches the wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }
}

/// Sequence-number scope of one command/response exchange.
///
/// Packet sequence ids increment by one (mod 256) within a conversation and
/// reset to zero when the client starts a new command. A gap on the read side
/// is a protocol error, never resynchronized silently.
#[derive(Debug, Default)]
pub struct Conversation {
    next_sequence: u8,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new conversation (new client command).
    pub fn reset(&mut self) {
        self.next_sequence = 0;
    }

    /// Take the sequence id for the next outgoing packet.
    pub fn next(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    /// Validate an incoming packet's sequence id.
    pub fn accept(&mut self, received: u8) -> Result<()> {
        if received != self.next_sequence {
            return Err(Error::PacketOutOfOrder {
                expected: self.next_sequence,
                received,
            });
        }
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Ok(())
    }

    /// Force the counter to a given value.
    ///
    /// The compressed protocol requires the logical counter to match the
    /// compressed frame counter at the start of a non-continuation packet.
    pub fn resync(&mut self, sequence: u8) {
        self.next_sequence = sequence;
    }

    pub fn peek(&self) -> u8 {
        self.next_sequence
    }
}

/// Frame one logical payload into wire packets, appending to `wire`.
///
/// Every payload produces at least one packet; a payload whose length is an
/// exact multiple of the maximum packet size (zero included) is terminated by
/// an extra zero-length packet so the receiver can find the end.
pub fn write_payload_packets(wire: &mut Vec<u8>, payload: &[u8], conversation: &mut Conversation) {
    let mut remaining = payload;
    loop {
        let chunk_len = remaining.len().min(MAX_PACKET_SIZE);
        let (chunk, rest) = remaining.split_at(chunk_len);
        remaining = rest;

        let header = PacketHeader::encode(chunk_len, conversation.next());
        wire.extend_from_slice(header.as_bytes());
        wire.extend_from_slice(chunk);

        // A non-full packet marks the end of the payload. Full packets keep
        // the loop going; an exactly-full final chunk falls through and emits
        // the zero-length terminator on the next iteration.
        if chunk_len < MAX_PACKET_SIZE {
            break;
        }
    }
}
