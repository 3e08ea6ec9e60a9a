//! Speech-synthesis collaborator contract.

use crate::config::SynthesisConfig;
use crate::error::{Result, VoxchatError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Voice parameters passed with every synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub voice: String,
    /// Speech speed multiplier, 1.0 = normal.
    pub speed: f32,
    pub sample_rate: u32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: crate::defaults::VOICE.to_string(),
            speed: crate::defaults::SPEECH_SPEED,
            sample_rate: crate::defaults::SYNTHESIS_SAMPLE_RATE,
        }
    }
}

impl From<&SynthesisConfig> for VoiceParams {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            speed: config.speed,
            sample_rate: config.sample_rate,
        }
    }
}

/// Trait for text-to-speech synthesis.
///
/// One call synthesizes one chunk of text. Cancellation is cooperative:
/// the streamer stops issuing calls once its turn is cancelled.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesizes the text chunk and returns the audio bytes.
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;
}

/// Mock synthesizer for testing.
///
/// Returns the chunk text as bytes so tests can assert content and
/// ordering. Per-call delays and failures are keyed by call index,
/// which makes out-of-order completion reproducible.
pub struct MockSynthesizer {
    delays: Mutex<HashMap<u32, Duration>>,
    failures: Mutex<HashMap<u32, String>>,
    base_delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)]
impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            base_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Applies a delay to every call.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delays the nth call (0-based) by the given duration.
    pub fn with_delay_on(self, call: u32, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(call, delay);
        self
    }

    /// Fails the nth call (0-based).
    pub fn with_failure_on(self, call: u32, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(call, message.to_string());
        self
    }

    /// Text of every synthesize call so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(text.to_string());
            (calls.len() - 1) as u32
        };

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(self.base_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.failures.lock().unwrap().get(&index) {
            return Err(VoxchatError::Synthesis {
                message: message.clone(),
            });
        }

        Ok(text.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_text_bytes() {
        let mock = MockSynthesizer::new();
        let audio = mock
            .synthesize("hello.", &VoiceParams::default())
            .await
            .unwrap();
        assert_eq!(audio, b"hello.");
        assert_eq!(mock.calls(), vec!["hello.".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_failure_on_indexed_call() {
        let mock = MockSynthesizer::new().with_failure_on(1, "tts broke");
        let voice = VoiceParams::default();
        assert!(mock.synthesize("a.", &voice).await.is_ok());
        assert!(mock.synthesize("b.", &voice).await.is_err());
        assert!(mock.synthesize("c.", &voice).await.is_ok());
    }

    #[test]
    fn test_voice_params_from_config() {
        let config = SynthesisConfig {
            voice: "warm".to_string(),
            speed: 1.25,
            sample_rate: 24_000,
            ..Default::default()
        };
        let params = VoiceParams::from(&config);
        assert_eq!(params.voice, "warm");
        assert_eq!(params.speed, 1.25);
        assert_eq!(params.sample_rate, 24_000);
    }
}
