//! Frame assembler: raw transport payloads → fixed-duration audio frames.
//!
//! Payloads arrive at arbitrary sizes; a carry-over remainder buffer joins
//! them so emitted frames always hold exactly one frame's worth of samples,
//! in arrival order, with contiguous sequence numbers.

use crate::error::{Result, VoxchatError};
use crate::pipeline::types::{AudioFrame, SessionId};
use std::time::Instant;

/// Re-chunks raw 16-bit little-endian PCM bytes into [`AudioFrame`]s.
pub struct FrameAssembler {
    session_id: SessionId,
    frame_duration_ms: u32,
    /// Samples per emitted frame.
    frame_samples: usize,
    /// Bytes carried over between payloads (always sample-aligned).
    remainder: Vec<u8>,
    next_sequence: u64,
}

impl FrameAssembler {
    /// Creates an assembler for one session.
    pub fn new(session_id: SessionId, sample_rate: u32, frame_duration_ms: u32) -> Self {
        let frame_samples = (sample_rate as usize * frame_duration_ms as usize) / 1000;
        Self {
            session_id,
            frame_duration_ms,
            frame_samples,
            remainder: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Consumes one transport payload and returns the complete frames it
    /// yields (possibly none). A payload that is not sample-aligned is
    /// malformed: it is dropped whole, the remainder and sequence state
    /// survive, and the session continues.
    pub fn push(&mut self, payload: &[u8]) -> Result<Vec<AudioFrame>> {
        if payload.len() % 2 != 0 {
            return Err(VoxchatError::MalformedAudio {
                message: format!(
                    "payload length {} is not aligned to 16-bit samples",
                    payload.len()
                ),
            });
        }

        self.remainder.extend_from_slice(payload);

        let frame_bytes = self.frame_samples * 2;
        let mut frames = Vec::new();
        let captured_at = Instant::now();

        while self.remainder.len() >= frame_bytes {
            let rest = self.remainder.split_off(frame_bytes);
            let bytes = std::mem::replace(&mut self.remainder, rest);
            let samples: Vec<i16> = bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect();

            frames.push(AudioFrame {
                session_id: self.session_id,
                sequence: self.next_sequence,
                captured_at,
                duration_ms: self.frame_duration_ms,
                samples,
            });
            self.next_sequence += 1;
        }

        Ok(frames)
    }

    /// Sequence number the next emitted frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Bytes currently buffered awaiting a full frame.
    pub fn buffered_bytes(&self) -> usize {
        self.remainder.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn assembler() -> FrameAssembler {
        // 16kHz, 20ms → 320 samples → 640 bytes per frame
        FrameAssembler::new(Uuid::new_v4(), 16000, 20)
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_exact_frame_payload_emits_one_frame() {
        let mut assembler = assembler();
        let payload = pcm_bytes(&vec![100i16; 320]);
        let frames = assembler.push(&payload).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[0].samples.len(), 320);
        assert_eq!(frames[0].duration_ms, 20);
        assert_eq!(assembler.buffered_bytes(), 0);
    }

    #[test]
    fn test_small_payloads_accumulate_via_remainder() {
        let mut assembler = assembler();
        // 200 samples, then 200 more: 400 total → one 320-sample frame + 80 left
        assert!(assembler.push(&pcm_bytes(&vec![1i16; 200])).unwrap().is_empty());
        let frames = assembler.push(&pcm_bytes(&vec![1i16; 200])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(assembler.buffered_bytes(), 80 * 2);
    }

    #[test]
    fn test_large_payload_emits_multiple_contiguous_frames() {
        let mut assembler = assembler();
        let payload = pcm_bytes(&vec![7i16; 320 * 3 + 10]);
        let frames = assembler.push(&payload).unwrap();
        assert_eq!(frames.len(), 3);
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(assembler.next_sequence(), 3);
    }

    #[test]
    fn test_sample_order_preserved_across_boundary() {
        let mut assembler = assembler();
        let samples: Vec<i16> = (0..400).collect();
        let bytes = pcm_bytes(&samples);
        // Split mid-sample-stream (but byte-aligned)
        assert!(assembler.push(&bytes[..300]).unwrap().is_empty());
        let frames = assembler.push(&bytes[300..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples[..], samples[..320]);
    }

    #[test]
    fn test_odd_length_payload_is_malformed() {
        let mut assembler = assembler();
        assert!(assembler.push(&pcm_bytes(&vec![1i16; 100])).unwrap().is_empty());
        let err = assembler.push(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, VoxchatError::MalformedAudio { .. }));
        // The malformed payload is dropped; prior remainder survives
        assert_eq!(assembler.buffered_bytes(), 200);
        // And the session keeps working
        let frames = assembler.push(&pcm_bytes(&vec![1i16; 220])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 0);
    }

    #[test]
    fn test_empty_payload_is_noop() {
        let mut assembler = assembler();
        assert!(assembler.push(&[]).unwrap().is_empty());
        assert_eq!(assembler.next_sequence(), 0);
    }

    #[test]
    fn test_little_endian_decoding() {
        let mut assembler = FrameAssembler::new(Uuid::new_v4(), 1000, 2); // 2 samples/frame
        let frames = assembler.push(&[0x34, 0x12, 0xFF, 0xFF]).unwrap();
        assert_eq!(frames[0].samples, vec![0x1234, -1]);
    }
}
