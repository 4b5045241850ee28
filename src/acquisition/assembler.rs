// src/acquisition/assembler.rs
//! Accumulates bulk chunks into whole frames
//!
//! Bulk reads return arbitrary chunk sizes; the assembler buffers them,
//! discards the unreliable leading bytes of a fresh stream, and cuts
//! exact frames as soon as enough bytes are in. A frame boundary never
//! aligns with chunk boundaries, so the remainder after a cut seeds the
//! next frame.

use crate::protocol::{ProtocolError, RawFrame};

/// Chunk-to-frame assembly for one capture run.
#[derive(Debug)]
pub struct FrameAssembler {
    record_length: usize,
    channel_count: usize,
    bytes_per_sample: usize,
    /// Stream bytes still to discard before real data starts.
    leading_remaining: usize,
    leading_discard: usize,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(
        record_length: usize,
        channel_count: usize,
        bytes_per_sample: usize,
        leading_discard: usize,
    ) -> Self {
        Self {
            record_length,
            channel_count,
            bytes_per_sample,
            leading_remaining: leading_discard,
            leading_discard,
            buffer: Vec::with_capacity(RawFrame::expected_len(
                record_length,
                channel_count,
                bytes_per_sample,
            )),
        }
    }

    /// Bytes one complete frame occupies.
    pub fn frame_len(&self) -> usize {
        RawFrame::expected_len(self.record_length, self.channel_count, self.bytes_per_sample)
    }

    /// Bytes buffered toward the next frame.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds one bulk chunk, returning every frame it completes. A chunk
    /// that breaks the per-sample granule means the stream lost sync and
    /// the caller must restart capture.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, ProtocolError> {
        let granule = self.channel_count * self.bytes_per_sample;
        if granule == 0 || chunk.len() % granule != 0 {
            return Err(ProtocolError::MisalignedChunk {
                len: chunk.len(),
                granule,
            });
        }

        let skip = self.leading_remaining.min(chunk.len());
        self.leading_remaining -= skip;
        self.buffer.extend_from_slice(&chunk[skip..]);

        let frame_len = self.frame_len();
        let mut frames = Vec::new();
        while self.buffer.len() >= frame_len {
            let rest = self.buffer.split_off(frame_len);
            let data = std::mem::replace(&mut self.buffer, rest);
            frames.push(RawFrame::decode(
                data,
                self.record_length,
                self.channel_count,
                self.bytes_per_sample,
            )?);
        }
        Ok(frames)
    }

    /// Drops buffered bytes and re-arms the leading discard, as after a
    /// capture restart.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.leading_remaining = self.leading_discard;
    }
}
