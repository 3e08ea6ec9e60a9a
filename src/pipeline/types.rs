//! Data types flowing between pipeline stages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Identifier for one conversation session.
pub type SessionId = Uuid;

/// Which party produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// Terminal outcome of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Fixed-duration audio frame produced by the frame assembler.
///
/// Immutable once produced. Sequence numbers are strictly increasing
/// per session; a gap means frames were dropped upstream.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub session_id: SessionId,
    pub sequence: u64,
    pub captured_at: Instant,
    pub duration_ms: u32,
    /// 16-bit PCM mono samples.
    pub samples: Vec<i16>,
}

/// A contiguous span of detected speech, closed by the segmenter.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub session_id: SessionId,
    pub utterance_id: u64,
    pub start_sequence: u64,
    pub end_sequence: u64,
    pub frames: Vec<AudioFrame>,
}

impl Utterance {
    /// Concatenated samples across all frames, in sequence order.
    pub fn samples(&self) -> Vec<i16> {
        let total = self.frames.iter().map(|f| f.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in &self.frames {
            samples.extend_from_slice(&frame.samples);
        }
        samples
    }

    /// Total duration of the utterance in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        self.frames.iter().map(|f| f.duration_ms).sum()
    }
}

/// Partial or final recognition result for one utterance.
///
/// Partials may be superseded by later partials or the final for the
/// same utterance id; a final is terminal.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub session_id: SessionId,
    pub utterance_id: u64,
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
    /// Raw diarization tag from the recognizer, if any.
    pub speaker_tag: Option<String>,
    pub emitted_at: DateTime<Utc>,
    /// Set when recognition degraded (timeout/error); the final is then
    /// empty-text so the turn can proceed without this utterance.
    pub error: Option<String>,
}

/// One synthesized audio chunk for an assistant turn.
///
/// `chunk_index` is strictly increasing per turn; consumers must not
/// reorder. `silence_fill` marks a slot substituted after a synthesis
/// timeout or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisChunk {
    pub turn_id: u64,
    pub chunk_index: u64,
    pub audio: Vec<u8>,
    pub is_final: bool,
    pub silence_fill: bool,
}

/// Structured events emitted outward across the transport boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    TranscriptPartial {
        utterance_id: u64,
        text: String,
        confidence: f32,
        speaker_label: Option<String>,
        emitted_at: DateTime<Utc>,
    },
    TranscriptFinal {
        utterance_id: u64,
        text: String,
        confidence: f32,
        speaker_label: Option<String>,
        /// True when recognition failed and the text was degraded to empty.
        degraded: bool,
        emitted_at: DateTime<Utc>,
    },
    TurnStarted {
        turn_id: u64,
        speaker: Speaker,
        at: DateTime<Utc>,
    },
    TurnStateChanged {
        turn_id: u64,
        speaker: Speaker,
        state: &'static str,
        at: DateTime<Utc>,
    },
    TurnEnded {
        turn_id: u64,
        speaker: Speaker,
        outcome: TurnOutcome,
        at: DateTime<Utc>,
    },
    /// The assistant turn failed; the caller should surface an explicit
    /// "unable to respond" rather than staying silent.
    AssistantUnavailable {
        turn_id: u64,
    },
    BackpressureDrop {
        stage: &'static str,
        utterance_id: u64,
    },
    StageError {
        stage: &'static str,
        message: String,
    },
    RecognitionTimeout {
        utterance_id: u64,
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64, samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            session_id: Uuid::nil(),
            sequence,
            captured_at: Instant::now(),
            duration_ms: 20,
            samples,
        }
    }

    #[test]
    fn test_utterance_samples_concatenate_in_order() {
        let utterance = Utterance {
            session_id: Uuid::nil(),
            utterance_id: 0,
            start_sequence: 10,
            end_sequence: 12,
            frames: vec![
                frame(10, vec![1, 2]),
                frame(11, vec![3, 4]),
                frame(12, vec![5]),
            ],
        };
        assert_eq!(utterance.samples(), vec![1, 2, 3, 4, 5]);
        assert_eq!(utterance.duration_ms(), 60);
    }

    #[test]
    fn test_pipeline_event_serializes_with_tag() {
        let event = PipelineEvent::BackpressureDrop {
            stage: "segmenter",
            utterance_id: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "backpressure_drop");
        assert_eq!(json["utterance_id"], 7);
    }

    #[test]
    fn test_turn_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&TurnOutcome::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&Speaker::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
