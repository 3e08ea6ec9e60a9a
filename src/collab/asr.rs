//! Speech-recognition collaborator contract.

use crate::error::{Result, VoxchatError};
use crate::pipeline::types::Utterance;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// One streamed recognition result for an utterance. Partials may be
/// superseded; the stream ends after the final update (the sender side
/// closes the channel).
#[derive(Debug, Clone)]
pub struct RecognitionUpdate {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
    /// Diarization tag, if the recognizer identifies speakers.
    pub speaker_tag: Option<String>,
}

/// Trait for streaming speech recognition.
///
/// Implementations receive a closed utterance and stream back partial
/// then final updates. Cancellation is by reference: dropping the
/// receiver aborts the request.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Starts recognition for the utterance and returns the update stream.
    ///
    /// # Arguments
    /// * `utterance` - Closed utterance with 16-bit PCM frames
    /// * `language_hint` - Language code, or "auto" for detection
    async fn recognize(
        &self,
        utterance: &Utterance,
        language_hint: &str,
    ) -> Result<mpsc::Receiver<RecognitionUpdate>>;
}

/// Scripted behavior for one [`MockRecognizer`] call.
#[derive(Debug, Clone)]
enum MockCall {
    /// Stream these updates, each after the given delay.
    Updates(Vec<RecognitionUpdate>, Duration),
    /// Fail the initial call.
    Fail(String),
    /// Open a stream but never send anything (provokes timeouts).
    Stall,
}

/// Mock recognizer for testing.
///
/// Calls consume scripted behaviors in order; once the script is
/// exhausted every call streams a single final "mock transcript".
pub struct MockRecognizer {
    script: Mutex<VecDeque<MockCall>>,
    calls: AtomicU32,
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)]
impl MockRecognizer {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Scripts a call that streams a partial then a final for `text`.
    pub fn then_text(self, text: &str) -> Self {
        let updates = vec![
            RecognitionUpdate {
                text: text.split_whitespace().next().unwrap_or("").to_string(),
                is_final: false,
                confidence: 0.4,
                speaker_tag: None,
            },
            RecognitionUpdate {
                text: text.to_string(),
                is_final: true,
                confidence: 0.92,
                speaker_tag: None,
            },
        ];
        self.then_updates(updates, Duration::ZERO)
    }

    /// Scripts a call that streams the given updates verbatim.
    pub fn then_updates(self, updates: Vec<RecognitionUpdate>, delay: Duration) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockCall::Updates(updates, delay));
        self
    }

    /// Scripts a call that fails immediately.
    pub fn then_fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockCall::Fail(message.to_string()));
        self
    }

    /// Scripts a call that opens a stream and never delivers, so the
    /// dispatcher's per-attempt timeout fires.
    pub fn then_stall(self) -> Self {
        self.script.lock().unwrap().push_back(MockCall::Stall);
        self
    }

    /// Number of recognize calls made so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(
        &self,
        _utterance: &Utterance,
        _language_hint: &str,
    ) -> Result<mpsc::Receiver<RecognitionUpdate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let call = self.script.lock().unwrap().pop_front();

        match call {
            Some(MockCall::Fail(message)) => Err(VoxchatError::Recognition { message }),
            Some(MockCall::Stall) => {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    // Hold the sender open without delivering anything.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    drop(tx);
                });
                Ok(rx)
            }
            Some(MockCall::Updates(updates, delay)) => {
                let (tx, rx) = mpsc::channel(updates.len().max(1));
                tokio::spawn(async move {
                    for update in updates {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        if tx.send(update).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(rx)
            }
            None => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let _ = tx
                        .send(RecognitionUpdate {
                            text: "mock transcript".to_string(),
                            is_final: true,
                            confidence: 0.9,
                            speaker_tag: None,
                        })
                        .await;
                });
                Ok(rx)
            }
        }
    }
}
