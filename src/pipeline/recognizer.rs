//! Recognition dispatcher.
//!
//! Consumes closed utterances, issues recognition requests to the ASR
//! collaborator with a bounded number in flight, and re-emits ordered
//! transcript events. Timeouts and errors retry under the shared
//! [`RetryPolicy`], then degrade to an empty failed-final transcript so
//! the turn manager can proceed without the utterance.

use crate::collab::asr::Recognizer;
use crate::config::RecognitionConfig;
use crate::pipeline::types::{PipelineEvent, TranscriptEvent, Utterance};
use crate::retry::RetryPolicy;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why one recognition attempt did not produce a final transcript.
enum AttemptFailure {
    TimedOut,
    Error(String),
}

pub struct RecognitionDispatcher {
    recognizer: Arc<dyn Recognizer>,
    config: RecognitionConfig,
    retry: RetryPolicy,
}

impl RecognitionDispatcher {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        config: RecognitionConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            recognizer,
            config,
            retry,
        }
    }

    /// Runs the dispatch loop until the utterance channel closes or the
    /// session is cancelled. In-flight requests are bounded by
    /// `max_in_flight`; permits are acquired in arrival order, so the
    /// default of 1 preserves transcript ordering across utterances.
    pub async fn run(
        self,
        mut utterance_rx: mpsc::Receiver<Utterance>,
        transcript_tx: mpsc::Sender<TranscriptEvent>,
        events_tx: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let dispatcher = Arc::new(self);

        loop {
            let utterance = tokio::select! {
                utterance = utterance_rx.recv() => match utterance {
                    Some(utterance) => utterance,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };

            let dispatcher = dispatcher.clone();
            let transcript_tx = transcript_tx.clone();
            let events_tx = events_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                dispatcher
                    .recognize_one(utterance, transcript_tx, events_tx, cancel)
                    .await;
                drop(permit);
            });
        }
    }

    /// Recognizes a single utterance through the retry budget.
    async fn recognize_one(
        &self,
        utterance: Utterance,
        transcript_tx: mpsc::Sender<TranscriptEvent>,
        events_tx: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) {
        let utterance_id = utterance.utterance_id;
        let mut last_failure = AttemptFailure::Error("no attempt made".to_string());

        for attempt in 0..self.retry.attempts() {
            if cancel.is_cancelled() {
                return;
            }

            match self
                .attempt(&utterance, &transcript_tx, &cancel)
                .await
            {
                Ok(()) => return,
                Err(failure) => {
                    match &failure {
                        AttemptFailure::TimedOut => warn!(
                            utterance_id,
                            attempt, "recognition attempt timed out"
                        ),
                        AttemptFailure::Error(message) => warn!(
                            utterance_id,
                            attempt, %message, "recognition attempt failed"
                        ),
                    }
                    last_failure = failure;
                }
            }

            if attempt < self.retry.max_retries {
                let delay = self.retry.delay_for(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }

        // Retry budget exhausted: degrade to an empty failed final.
        let error = match last_failure {
            AttemptFailure::TimedOut => {
                let _ = events_tx
                    .send(PipelineEvent::RecognitionTimeout {
                        utterance_id,
                        attempts: self.retry.attempts(),
                    })
                    .await;
                crate::VoxchatError::RecognitionTimeout {
                    utterance_id,
                    attempts: self.retry.attempts(),
                }
                .to_string()
            }
            AttemptFailure::Error(message) => {
                let _ = events_tx
                    .send(PipelineEvent::StageError {
                        stage: "recognition",
                        message: message.clone(),
                    })
                    .await;
                message
            }
        };

        let _ = transcript_tx
            .send(TranscriptEvent {
                session_id: utterance.session_id,
                utterance_id,
                text: String::new(),
                is_final: true,
                confidence: 0.0,
                speaker_tag: None,
                emitted_at: Utc::now(),
                error: Some(error),
            })
            .await;
    }

    /// One recognition attempt: stream updates until the final arrives,
    /// the per-attempt deadline passes, or the stream misbehaves.
    async fn attempt(
        &self,
        utterance: &Utterance,
        transcript_tx: &mpsc::Sender<TranscriptEvent>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), AttemptFailure> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.timeout_ms);

        let mut stream = match tokio::time::timeout_at(
            deadline,
            self.recognizer.recognize(utterance, &self.config.language),
        )
        .await
        {
            Err(_) => return Err(AttemptFailure::TimedOut),
            Ok(Err(error)) => return Err(AttemptFailure::Error(error.to_string())),
            Ok(Ok(stream)) => stream,
        };

        loop {
            let update = tokio::select! {
                update = tokio::time::timeout_at(deadline, stream.recv()) => match update {
                    Err(_) => return Err(AttemptFailure::TimedOut),
                    Ok(update) => update,
                },
                _ = cancel.cancelled() => return Ok(()),
            };

            match update {
                None => {
                    return Err(AttemptFailure::Error(
                        "recognition stream ended without a final result".to_string(),
                    ));
                }
                Some(update) => {
                    let is_final = update.is_final;
                    debug!(
                        utterance_id = utterance.utterance_id,
                        is_final,
                        text_len = update.text.len(),
                        "transcript update"
                    );
                    let event = TranscriptEvent {
                        session_id: utterance.session_id,
                        utterance_id: utterance.utterance_id,
                        text: update.text,
                        is_final,
                        confidence: update.confidence,
                        speaker_tag: update.speaker_tag,
                        emitted_at: Utc::now(),
                        error: None,
                    };
                    if transcript_tx.send(event).await.is_err() {
                        return Ok(());
                    }
                    if is_final {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::asr::MockRecognizer;
    use crate::pipeline::types::AudioFrame;
    use std::time::Instant;
    use uuid::Uuid;

    fn utterance(id: u64) -> Utterance {
        Utterance {
            session_id: Uuid::nil(),
            utterance_id: id,
            start_sequence: 0,
            end_sequence: 1,
            frames: vec![AudioFrame {
                session_id: Uuid::nil(),
                sequence: 0,
                captured_at: Instant::now(),
                duration_ms: 20,
                samples: vec![1000; 320],
            }],
        }
    }

    fn test_config() -> RecognitionConfig {
        RecognitionConfig {
            timeout_ms: 1_000,
            max_retries: 1,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 400,
            ..Default::default()
        }
    }

    async fn run_dispatcher(
        recognizer: Arc<MockRecognizer>,
        utterances: Vec<Utterance>,
    ) -> (Vec<TranscriptEvent>, Vec<PipelineEvent>) {
        let config = test_config();
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        );
        let dispatcher = RecognitionDispatcher::new(recognizer, config, retry);

        let (utterance_tx, utterance_rx) = mpsc::channel(8);
        let (transcript_tx, mut transcript_rx) = mpsc::channel(32);
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        for u in utterances {
            utterance_tx.send(u).await.unwrap();
        }
        drop(utterance_tx);

        dispatcher
            .run(utterance_rx, transcript_tx, events_tx, cancel)
            .await;

        // run() returns when the channel closes, but spawned recognition
        // tasks may still be flushing; receivers see channel close when
        // those tasks drop their senders.
        let mut transcripts = Vec::new();
        while let Some(event) = transcript_rx.recv().await {
            transcripts.push(event);
        }
        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        (transcripts, events)
    }

    #[tokio::test]
    async fn test_partial_and_final_forwarded() {
        let recognizer = Arc::new(MockRecognizer::new().then_text("turn on the lights"));
        let (transcripts, events) = run_dispatcher(recognizer, vec![utterance(0)]).await;

        assert_eq!(transcripts.len(), 2);
        assert!(!transcripts[0].is_final);
        assert!(transcripts[1].is_final);
        assert_eq!(transcripts[1].text, "turn on the lights");
        assert!(transcripts[1].error.is_none());
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_retry_exhausted_degrades() {
        // Budget is 1 retry: two stalls exhaust it. Expect exactly one
        // RecognitionTimeout report and a failed final with empty text.
        let recognizer = Arc::new(MockRecognizer::new().then_stall().then_stall());
        let (transcripts, events) =
            run_dispatcher(recognizer.clone(), vec![utterance(3)]).await;

        assert_eq!(recognizer.call_count(), 2);
        assert_eq!(transcripts.len(), 1);
        let failed = &transcripts[0];
        assert!(failed.is_final);
        assert_eq!(failed.text, "");
        assert_eq!(failed.confidence, 0.0);
        assert!(failed.error.is_some());

        let timeouts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::RecognitionTimeout { .. }))
            .collect();
        assert_eq!(timeouts.len(), 1);
        match timeouts[0] {
            PipelineEvent::RecognitionTimeout {
                utterance_id,
                attempts,
            } => {
                assert_eq!(*utterance_id, 3);
                assert_eq!(*attempts, 2);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success_on_retry() {
        let recognizer = Arc::new(MockRecognizer::new().then_stall().then_text("recovered"));
        let (transcripts, events) =
            run_dispatcher(recognizer.clone(), vec![utterance(0)]).await;

        assert_eq!(recognizer.call_count(), 2);
        let finals: Vec<_> = transcripts.iter().filter(|t| t.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, "recovered");
        assert!(finals[0].error.is_none());
        // Success on retry: nothing surfaced as a timeout report
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, PipelineEvent::RecognitionTimeout { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_retry_succeeds() {
        let recognizer = Arc::new(
            MockRecognizer::new()
                .then_fail("backend hiccup")
                .then_text("second try"),
        );
        let (transcripts, _) = run_dispatcher(recognizer, vec![utterance(0)]).await;
        let finals: Vec<_> = transcripts.iter().filter(|t| t.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, "second try");
    }

    #[tokio::test]
    async fn test_multiple_utterances_processed_in_order() {
        let recognizer = Arc::new(
            MockRecognizer::new()
                .then_text("first utterance")
                .then_text("second utterance"),
        );
        let (transcripts, _) =
            run_dispatcher(recognizer, vec![utterance(0), utterance(1)]).await;

        let finals: Vec<_> = transcripts.iter().filter(|t| t.is_final).collect();
        assert_eq!(finals.len(), 2);
        // max_in_flight=1 keeps cross-utterance ordering
        assert_eq!(finals[0].utterance_id, 0);
        assert_eq!(finals[0].text, "first utterance");
        assert_eq!(finals[1].utterance_id, 1);
        assert_eq!(finals[1].text, "second utterance");
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let recognizer = Arc::new(MockRecognizer::new());
        let dispatcher = RecognitionDispatcher::new(
            recognizer.clone(),
            test_config(),
            RetryPolicy::none(),
        );

        let (_utterance_tx, utterance_rx) = mpsc::channel::<Utterance>(8);
        let (transcript_tx, _transcript_rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Returns promptly instead of waiting on the open channel
        dispatcher
            .run(utterance_rx, transcript_tx, events_tx, cancel)
            .await;
        assert_eq!(recognizer.call_count(), 0);
    }
}
