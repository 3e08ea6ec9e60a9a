//! Language-model collaborator contract.

use crate::context::CompletedTurn;
use crate::error::{Result, VoxchatError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Trait for streamed response generation.
///
/// The stream carries text deltas in generation order; an `Err` item
/// aborts the response. Cancellation is by reference: dropping the
/// receiver stops generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Starts generating a response to `user_text` given the completed
    /// conversation turns, and returns the delta stream.
    async fn generate(
        &self,
        context: &[CompletedTurn],
        user_text: &str,
    ) -> Result<mpsc::Receiver<Result<String>>>;
}

/// Scripted behavior for one [`MockGenerator`] call.
enum MockResponse {
    /// Stream these deltas, each after the given delay; an optional
    /// error terminates the stream after the deltas.
    Stream {
        deltas: Vec<String>,
        delay: Duration,
        then_error: Option<String>,
    },
    /// Fail the initial call.
    Fail(String),
    /// Open a stream but never produce a delta.
    Stall,
    /// Block inside the generate call itself.
    Hang,
}

/// Mock generator for testing.
///
/// Responses are consumed in script order; when the script is exhausted
/// every call streams "mock response." as a single delta. Records each
/// prompt it receives.
pub struct MockGenerator {
    script: Mutex<VecDeque<MockResponse>>,
    prompts: Mutex<Vec<(usize, String)>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)]
impl MockGenerator {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a response streamed as the given deltas.
    pub fn then_deltas(self, deltas: &[&str]) -> Self {
        self.then_deltas_with_delay(deltas, Duration::ZERO)
    }

    /// Scripts a response with a per-delta delay.
    pub fn then_deltas_with_delay(self, deltas: &[&str], delay: Duration) -> Self {
        self.script.lock().unwrap().push_back(MockResponse::Stream {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            delay,
            then_error: None,
        });
        self
    }

    /// Scripts a response that errors mid-stream after the given deltas.
    pub fn then_deltas_then_error(self, deltas: &[&str], message: &str) -> Self {
        self.script.lock().unwrap().push_back(MockResponse::Stream {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            delay: Duration::ZERO,
            then_error: Some(message.to_string()),
        });
        self
    }

    /// Scripts a call that fails before streaming anything.
    pub fn then_fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockResponse::Fail(message.to_string()));
        self
    }

    /// Scripts a call whose stream never produces a first delta.
    pub fn then_stall(self) -> Self {
        self.script.lock().unwrap().push_back(MockResponse::Stall);
        self
    }

    /// Scripts a call that never returns from generate itself.
    pub fn then_hang(self) -> Self {
        self.script.lock().unwrap().push_back(MockResponse::Hang);
        self
    }

    /// Prompts received so far, as (context turn count, user text).
    pub fn prompts(&self) -> Vec<(usize, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        context: &[CompletedTurn],
        user_text: &str,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        self.prompts
            .lock()
            .unwrap()
            .push((context.len(), user_text.to_string()));
        let response = self.script.lock().unwrap().pop_front();

        match response {
            Some(MockResponse::Fail(message)) => Err(VoxchatError::Generation { message }),
            Some(MockResponse::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(VoxchatError::Generation {
                    message: "hung call returned".to_string(),
                })
            }
            Some(MockResponse::Stall) => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    drop(tx);
                });
                Ok(rx)
            }
            Some(MockResponse::Stream {
                deltas,
                delay,
                then_error,
            }) => {
                let (tx, rx) = mpsc::channel(deltas.len().max(1));
                tokio::spawn(async move {
                    for delta in deltas {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                    if let Some(message) = then_error {
                        let _ = tx.send(Err(VoxchatError::Generation { message })).await;
                    }
                });
                Ok(rx)
            }
            None => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let _ = tx.send(Ok("mock response.".to_string())).await;
                });
                Ok(rx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_streams_deltas_in_order() {
        let mock = MockGenerator::new().then_deltas(&["Hello ", "there."]);
        let mut rx = mock.generate(&[], "hi").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "Hello ");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "there.");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_mid_stream_error() {
        let mock = MockGenerator::new().then_deltas_then_error(&["one. ", "two. "], "boom");
        let mut rx = mock.generate(&[], "hi").await.unwrap();
        assert!(rx.recv().await.unwrap().is_ok());
        assert!(rx.recv().await.unwrap().is_ok());
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let mock = MockGenerator::new();
        let _ = mock.generate(&[], "what time is it").await.unwrap();
        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, 0);
        assert_eq!(prompts[0].1, "what time is it");
    }

    #[tokio::test]
    async fn test_mock_initial_failure() {
        let mock = MockGenerator::new().then_fail("llm offline");
        assert!(mock.generate(&[], "hi").await.is_err());
    }
}
