// src/protocol/frames.rs
//! Bulk-transfer frame layout
//!
//! A frame is the raw byte payload of one acquisition: `record_length`
//! samples per channel, channels interleaved sample-by-sample, one byte per
//! sample on the supported models. The only validation the protocol can do
//! is the length equation; sample values are opaque until conversion.

use super::ProtocolError;

/// One complete raw acquisition buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Interleaved sample bytes, `channel_count * record_length` long.
    pub data: Vec<u8>,
    pub channel_count: usize,
    /// Samples per channel.
    pub record_length: usize,
}

impl RawFrame {
    /// Wire length of a frame with the given geometry.
    pub fn expected_len(record_length: usize, channel_count: usize, bytes_per_sample: usize) -> usize {
        record_length * channel_count * bytes_per_sample
    }

    /// Builds a frame from assembled bulk bytes, verifying the length
    /// equation `record_length * channel_count * bytes_per_sample`.
    pub fn decode(
        data: Vec<u8>,
        record_length: usize,
        channel_count: usize,
        bytes_per_sample: usize,
    ) -> Result<Self, ProtocolError> {
        let expected = Self::expected_len(record_length, channel_count, bytes_per_sample);
        if data.len() != expected {
            return Err(ProtocolError::FrameSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            channel_count,
            record_length,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterator over one channel's raw samples in stream order.
    pub fn channel_samples(&self, channel: usize) -> impl Iterator<Item = u8> + '_ {
        self.data
            .iter()
            .skip(channel)
            .step_by(self.channel_count.max(1))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_exact_length() {
        let frame = RawFrame::decode(vec![0u8; 40], 20, 2, 1).unwrap();
        assert_eq!(frame.record_length, 20);
        assert_eq!(frame.channel_count, 2);
        assert_eq!(frame.len(), 40);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let result = RawFrame::decode(vec![0u8; 39], 20, 2, 1);
        assert_eq!(
            result,
            Err(ProtocolError::FrameSizeMismatch {
                expected: 40,
                actual: 39
            })
        );
    }

    #[test]
    fn test_decode_rejects_long_buffer() {
        assert!(RawFrame::decode(vec![0u8; 41], 20, 2, 1).is_err());
    }

    #[test]
    fn test_channel_samples_deinterleave() {
        let frame = RawFrame::decode(vec![1, 10, 2, 20, 3, 30], 3, 2, 1).unwrap();
        let ch0: Vec<u8> = frame.channel_samples(0).collect();
        let ch1: Vec<u8> = frame.channel_samples(1).collect();
        assert_eq!(ch0, vec![1, 2, 3]);
        assert_eq!(ch1, vec![10, 20, 30]);
    }
}
