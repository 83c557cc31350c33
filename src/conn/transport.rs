use zerocopy::FromBytes;

use crate::constant::MAX_PACKET_SIZE;
use crate::error::{Error, Result};
use crate::protocol::compress::{COMPRESSED_HEADER_LEN, CompressedFramer, CompressedHeader};
use crate::protocol::packet::{Conversation, PacketHeader, write_payload_packets};

use super::stream::{Stream, TimeBudget};

/// Inflated-but-unconsumed bytes from the compressed stream.
struct CompressionState {
    framer: CompressedFramer,
    inflated: Vec<u8>,
    cursor: usize,
    /// Set when a frame has been read and no logical packet has started
    /// inside it yet; drives the sequence-resync quirk.
    fresh_frame: bool,
    frame_scratch: Vec<u8>,
}

impl CompressionState {
    fn new() -> Self {
        Self {
            framer: CompressedFramer::new(),
            inflated: Vec::new(),
            cursor: 0,
            fresh_frame: false,
            frame_scratch: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        self.inflated.len() - self.cursor
    }
}

/// A [`Stream`] plus the optional compression layer beneath the packet
/// framer. Layers above only see logical payloads.
pub(crate) struct Transport {
    stream: Stream,
    compression: Option<CompressionState>,
}

impl Transport {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            compression: None,
        }
    }

    /// Insert the compression layer; called once, after the handshake
    /// negotiated CLIENT_COMPRESS.
    pub fn enable_compression(&mut self) {
        self.compression = Some(CompressionState::new());
    }

    /// Swap the stream out for its TLS upgrade mid-handshake.
    pub fn take_stream(&mut self) -> Stream {
        std::mem::replace(&mut self.stream, Stream::Detached)
    }

    pub fn put_stream(&mut self, stream: Stream) {
        self.stream = stream;
    }

    /// Reset both sequence scopes for a new command.
    pub fn start_conversation(&mut self, conversation: &mut Conversation) {
        conversation.reset();
        if let Some(c) = &mut self.compression {
            c.framer.reset();
        }
    }

    async fn refill(&mut self, budget: &TimeBudget) -> Result<()> {
        let Some(c) = &mut self.compression else {
            return Err(Error::InvalidPacket);
        };

        let mut header_bytes = [0u8; COMPRESSED_HEADER_LEN];
        self.stream.read_exact(&mut header_bytes, budget).await?;
        let header =
            CompressedHeader::read_from_bytes(&header_bytes).map_err(|_| Error::InvalidPacket)?;
        c.framer.accept(header.sequence_id)?;

        c.frame_scratch.clear();
        c.frame_scratch.resize(header.compressed_length(), 0);
        self.stream.read_exact(&mut c.frame_scratch, budget).await?;

        // Drop consumed bytes before growing the buffer again
        c.inflated.drain(..c.cursor);
        c.cursor = 0;
        CompressedFramer::decode_frame(&header, &c.frame_scratch, &mut c.inflated)?;
        c.fresh_frame = true;
        Ok(())
    }

    /// Read raw wire bytes through whichever layer is active.
    async fn read_wire(&mut self, buf: &mut [u8], budget: &TimeBudget) -> Result<()> {
        match &mut self.compression {
            None => self.stream.read_exact(buf, budget).await,
            Some(_) => {
                let mut filled = 0;
                while filled < buf.len() {
                    if self.compression.as_ref().is_some_and(|c| c.remaining() == 0) {
                        self.refill(budget).await?;
                    }
                    let c = self.compression.as_mut().ok_or(Error::InvalidPacket)?;
                    let take = (buf.len() - filled).min(c.remaining());
                    buf[filled..filled + take]
                        .copy_from_slice(&c.inflated[c.cursor..c.cursor + take]);
                    c.cursor += take;
                    filled += take;
                }
                Ok(())
            }
        }
    }

    /// Read one logical payload, concatenating continuation packets.
    #[tracing::instrument(skip_all)]
    pub async fn read_payload(
        &mut self,
        conversation: &mut Conversation,
        budget: &TimeBudget,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        out.clear();
        let mut continuation = false;
        loop {
            // Make sure the next header's frame has been read before deciding
            // whether to resync the logical counter.
            if let Some(c) = &self.compression
                && c.remaining() == 0
            {
                self.refill(budget).await?;
            }

            // Known server quirk: at the start of a non-continuation packet
            // the logical sequence number restarts from the compressed
            // frame's sequence number. Continuation packets of a >16MiB
            // payload keep counting.
            if let Some(c) = &mut self.compression
                && c.fresh_frame
            {
                if !continuation {
                    conversation.resync(c.framer.sequence().wrapping_sub(1));
                }
                c.fresh_frame = false;
            }

            let mut header_bytes = [0u8; 4];
            self.read_wire(&mut header_bytes, budget).await?;
            let header =
                PacketHeader::read_from_bytes(&header_bytes).map_err(|_| Error::InvalidPacket)?;
            conversation.accept(header.sequence_id)?;

            let length = header.length();
            let start = out.len();
            out.resize(start + length, 0);
            self.read_wire(&mut out[start..], budget).await?;

            if length < MAX_PACKET_SIZE {
                return Ok(());
            }
            continuation = true;
        }
    }

    /// Frame and send one logical payload.
    #[tracing::instrument(skip_all)]
    pub async fn write_payload(
        &mut self,
        conversation: &mut Conversation,
        budget: &TimeBudget,
        payload: &[u8],
        wire: &mut Vec<u8>,
    ) -> Result<()> {
        wire.clear();
        write_payload_packets(wire, payload, conversation);

        match &mut self.compression {
            None => self.stream.write_all(wire, budget).await,
            Some(c) => {
                c.frame_scratch.clear();
                c.framer.write_frames(&mut c.frame_scratch, wire)?;
                self.stream.write_all(&c.frame_scratch, budget).await?;
                // The logical counter follows the frame counter after a
                // compressed write, mirroring the read-side resync.
                conversation.resync(c.framer.sequence());
                Ok(())
            }
        }
    }
}
