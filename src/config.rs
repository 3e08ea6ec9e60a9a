//! Session pipeline configuration.
//!
//! All tuning values live here; none of them are hardcoded in the stages.
//! Missing fields in a TOML file fall back to the documented defaults.

use crate::defaults;
use crate::error::VoxchatError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub segmenter: SegmenterConfig,
    pub recognition: RecognitionConfig,
    pub turn: TurnConfig,
    pub synthesis: SynthesisConfig,
    pub history: HistoryConfig,
    pub channels: ChannelConfig,
}

/// Audio framing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
}

/// Voice-activity segmenter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    pub speech_threshold: f32,
    pub start_frames: u32,
    pub end_frames: u32,
    pub max_utterance_ms: u32,
    pub queue_capacity: usize,
}

/// Recognition dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub language: String,
    pub max_in_flight: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

/// Turn manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnConfig {
    pub silence_timeout_ms: u64,
    pub first_token_timeout_ms: u64,
}

/// Synthesis streamer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub voice: String,
    pub speed: f32,
    pub sample_rate: u32,
    pub min_chunk_chars: usize,
    pub max_chunk_chars: usize,
    pub chunk_timeout_ms: u64,
    pub max_parallel: usize,
}

/// Conversation history retention configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_turns: usize,
    /// 0 disables age-based eviction.
    pub max_age_secs: u64,
}

/// Bounded-queue capacities between stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub audio_capacity: usize,
    pub event_capacity: usize,
    pub transcript_capacity: usize,
    pub chunk_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::SPEECH_THRESHOLD,
            start_frames: defaults::SPEECH_START_FRAMES,
            end_frames: defaults::SPEECH_END_FRAMES,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
            queue_capacity: defaults::UTTERANCE_QUEUE_CAPACITY,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: defaults::LANGUAGE.to_string(),
            max_in_flight: defaults::RECOGNITION_MAX_IN_FLIGHT,
            timeout_ms: defaults::RECOGNITION_TIMEOUT_MS,
            max_retries: defaults::RECOGNITION_MAX_RETRIES,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            first_token_timeout_ms: defaults::FIRST_TOKEN_TIMEOUT_MS,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: defaults::VOICE.to_string(),
            speed: defaults::SPEECH_SPEED,
            sample_rate: defaults::SYNTHESIS_SAMPLE_RATE,
            min_chunk_chars: defaults::MIN_CHUNK_CHARS,
            max_chunk_chars: defaults::MAX_CHUNK_CHARS,
            chunk_timeout_ms: defaults::CHUNK_TIMEOUT_MS,
            max_parallel: defaults::SYNTHESIS_MAX_PARALLEL,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: defaults::HISTORY_MAX_TURNS,
            max_age_secs: defaults::HISTORY_MAX_AGE_SECS,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            audio_capacity: defaults::AUDIO_CHANNEL_CAPACITY,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            transcript_capacity: defaults::TRANSCRIPT_CHANNEL_CAPACITY,
            chunk_capacity: defaults::CHUNK_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML or invalid values.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validates every tuning value, naming the offending key on failure.
    pub fn validate(&self) -> crate::Result<()> {
        fn invalid(key: &str, message: &str) -> VoxchatError {
            VoxchatError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.frame_duration_ms == 0 {
            return Err(invalid("audio.frame_duration_ms", "must be positive"));
        }
        if !(self.segmenter.speech_threshold > 0.0 && self.segmenter.speech_threshold <= 1.0) {
            return Err(invalid(
                "segmenter.speech_threshold",
                "must be within (0.0, 1.0]",
            ));
        }
        if self.segmenter.start_frames == 0 {
            return Err(invalid("segmenter.start_frames", "must be positive"));
        }
        if self.segmenter.end_frames == 0 {
            return Err(invalid("segmenter.end_frames", "must be positive"));
        }
        if self.segmenter.max_utterance_ms < self.audio.frame_duration_ms {
            return Err(invalid(
                "segmenter.max_utterance_ms",
                "must cover at least one frame",
            ));
        }
        if self.segmenter.queue_capacity == 0 {
            return Err(invalid("segmenter.queue_capacity", "must be positive"));
        }
        if self.recognition.max_in_flight == 0 {
            return Err(invalid("recognition.max_in_flight", "must be positive"));
        }
        if self.recognition.timeout_ms == 0 {
            return Err(invalid("recognition.timeout_ms", "must be positive"));
        }
        if self.synthesis.speed <= 0.0 {
            return Err(invalid("synthesis.speed", "must be positive"));
        }
        if self.synthesis.min_chunk_chars > self.synthesis.max_chunk_chars {
            return Err(invalid(
                "synthesis.min_chunk_chars",
                "must not exceed synthesis.max_chunk_chars",
            ));
        }
        if self.synthesis.max_parallel == 0 {
            return Err(invalid("synthesis.max_parallel", "must be positive"));
        }
        if self.history.max_turns == 0 {
            return Err(invalid("history.max_turns", "must be positive"));
        }
        for (key, value) in [
            ("channels.audio_capacity", self.channels.audio_capacity),
            ("channels.event_capacity", self.channels.event_capacity),
            (
                "channels.transcript_capacity",
                self.channels.transcript_capacity,
            ),
            ("channels.chunk_capacity", self.channels.chunk_capacity),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be positive"));
            }
        }
        Ok(())
    }

    /// Retry policy derived from the recognition section.
    pub fn recognition_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.recognition.max_retries,
            Duration::from_millis(self.recognition.retry_base_delay_ms),
            Duration::from_millis(self.recognition.retry_max_delay_ms),
        )
    }

    /// Number of samples in one audio frame.
    pub fn frame_samples(&self) -> usize {
        (self.audio.sample_rate as usize * self.audio.frame_duration_ms as usize) / 1000
    }
}
