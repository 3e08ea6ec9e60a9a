//! Session assembly and turn driver.
//!
//! Wires the stages into one running session: ingest (framing and
//! segmentation), recognition dispatch, the turn driver around the
//! [`TurnMachine`], responder tasks for assistant turns, and the gated
//! chunk forwarder that discards audio of barged-in turns. Stages talk
//! over bounded channels; a session-wide cancellation token tears all of
//! them down.

use crate::collab::asr::Recognizer;
use crate::collab::llm::Generator;
use crate::collab::tts::Synthesizer;
use crate::config::Config;
use crate::context::{CompletedTurn, ConversationContext};
use crate::error::VoxchatError;
use crate::pipeline::framer::FrameAssembler;
use crate::pipeline::recognizer::RecognitionDispatcher;
use crate::pipeline::segmenter::{SegmentEvent, Segmenter, UtteranceQueue};
use crate::pipeline::synthesis::{SynthesisOutcome, SynthesisStreamer};
use crate::pipeline::turn::{TurnAction, TurnMachine, TurnSignal};
use crate::pipeline::types::{
    PipelineEvent, SessionId, Speaker, SynthesisChunk, TranscriptEvent, TurnOutcome,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builder for one conversation session.
pub struct SessionPipeline {
    config: Config,
    recognizer: Arc<dyn Recognizer>,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl SessionPipeline {
    pub fn new(
        config: Config,
        recognizer: Arc<dyn Recognizer>,
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config,
            recognizer,
            generator,
            synthesizer,
        }
    }

    /// Validates the configuration, spawns the stage tasks, and returns
    /// the caller-facing handle.
    pub fn start(self) -> crate::Result<SessionHandle> {
        self.config.validate()?;
        let config = self.config;
        let session_id: SessionId = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let (audio_tx, audio_rx) = mpsc::channel(config.channels.audio_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.channels.event_capacity);
        let (utterance_tx, utterance_rx) = mpsc::channel(config.segmenter.queue_capacity);
        let (transcript_tx, transcript_rx) =
            mpsc::channel::<TranscriptEvent>(config.channels.transcript_capacity);
        let (signal_tx, signal_rx) = mpsc::channel(config.channels.event_capacity);
        let (chunk_tx, chunk_rx) = mpsc::channel(config.channels.chunk_capacity);
        let (audio_out_tx, audio_out_rx) = mpsc::channel(config.channels.chunk_capacity);
        let (responder_tx, responder_rx) = mpsc::channel(16);
        let (active_turn_tx, active_turn_rx) = watch::channel(None::<u64>);
        let (snapshot_tx, snapshot_rx) = oneshot::channel();

        info!(%session_id, "session starting");

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let assembler = FrameAssembler::new(
            session_id,
            config.audio.sample_rate,
            config.audio.frame_duration_ms,
        );
        let segmenter = Segmenter::new(session_id, config.segmenter.clone());
        let queue = UtteranceQueue::new(utterance_tx, config.segmenter.queue_capacity);
        tasks.push(tokio::spawn(ingest_loop(
            audio_rx,
            assembler,
            segmenter,
            queue,
            signal_tx,
            events_tx.clone(),
            cancel.clone(),
        )));

        let dispatcher = RecognitionDispatcher::new(
            self.recognizer,
            config.recognition.clone(),
            config.recognition_retry_policy(),
        );
        tasks.push(tokio::spawn(dispatcher.run(
            utterance_rx,
            transcript_tx,
            events_tx.clone(),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(forward_chunks(
            chunk_rx,
            audio_out_tx,
            active_turn_rx,
            cancel.clone(),
        )));

        let driver = TurnDriver {
            session_id,
            machine: TurnMachine::new(),
            context: ConversationContext::new(config.history.clone()),
            generator: self.generator,
            synthesizer: self.synthesizer,
            events_tx,
            chunk_tx,
            responder_tx,
            active_turn_tx,
            responder: None,
            silence_deadline: None,
            cancel: cancel.clone(),
            snapshot_tx,
            config,
        };
        tasks.push(tokio::spawn(driver.run(signal_rx, transcript_rx, responder_rx)));

        Ok(SessionHandle {
            session_id,
            audio_tx,
            events_rx: Some(events_rx),
            audio_out_rx: Some(audio_out_rx),
            snapshot_rx,
            cancel,
            tasks,
        })
    }
}

/// Caller-facing handle for a running session.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    audio_tx: mpsc::Sender<Vec<u8>>,
    events_rx: Option<mpsc::Receiver<PipelineEvent>>,
    audio_out_rx: Option<mpsc::Receiver<SynthesisChunk>>,
    snapshot_rx: oneshot::Receiver<Arc<[CompletedTurn]>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Feeds one raw 16-bit little-endian PCM payload into the session.
    pub async fn push_audio(&self, payload: Vec<u8>) -> crate::Result<()> {
        self.audio_tx
            .send(payload)
            .await
            .map_err(|_| VoxchatError::SessionClosed)
    }

    /// Takes the outward event stream. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<PipelineEvent>> {
        self.events_rx.take()
    }

    /// Takes the synthesized-audio stream. Returns `None` after the first call.
    pub fn take_audio_out(&mut self) -> Option<mpsc::Receiver<SynthesisChunk>> {
        self.audio_out_rx.take()
    }

    /// Cancels the session, waits for every stage task to stop, and
    /// returns the final conversation history.
    pub async fn close(mut self) -> Arc<[CompletedTurn]> {
        info!(session_id = %self.session_id, "session closing");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.snapshot_rx
            .await
            .unwrap_or_else(|_| Arc::from(Vec::new()))
    }
}

/// Frames raw payloads, runs the segmenter, and hands utterances to the
/// recognition queue. Malformed payloads are reported and skipped; the
/// session keeps running.
async fn ingest_loop(
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    mut assembler: FrameAssembler,
    mut segmenter: Segmenter,
    mut queue: UtteranceQueue,
    signal_tx: mpsc::Sender<TurnSignal>,
    events_tx: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            payload = audio_rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        // Retry delivery of utterances parked during earlier backpressure.
        queue.drain();

        let frames = match assembler.push(&payload) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(error = %err, "dropping malformed audio payload");
                let _ = events_tx.try_send(PipelineEvent::StageError {
                    stage: "framer",
                    message: err.to_string(),
                });
                continue;
            }
        };

        for frame in frames {
            for event in segmenter.push_frame(frame) {
                handle_segment_event(event, &mut queue, &signal_tx, &events_tx).await;
            }
        }
    }

    if let Some(event) = segmenter.flush() {
        handle_segment_event(event, &mut queue, &signal_tx, &events_tx).await;
    }
}

async fn handle_segment_event(
    event: SegmentEvent,
    queue: &mut UtteranceQueue,
    signal_tx: &mpsc::Sender<TurnSignal>,
    events_tx: &mpsc::Sender<PipelineEvent>,
) {
    match event {
        SegmentEvent::SpeechStarted { utterance_id } => {
            let _ = signal_tx
                .send(TurnSignal::SpeechStarted { utterance_id })
                .await;
        }
        SegmentEvent::UtteranceClosed(utterance) => {
            let utterance_id = utterance.utterance_id;
            let _ = signal_tx
                .send(TurnSignal::UtteranceClosed { utterance_id })
                .await;
            for dropped in queue.offer(utterance) {
                warn!(
                    utterance_id = dropped.utterance_id,
                    "recognition backlog full, shedding oldest utterance"
                );
                let _ = events_tx.try_send(PipelineEvent::BackpressureDrop {
                    stage: "recognition",
                    utterance_id: dropped.utterance_id,
                });
            }
        }
    }
}

/// Forwards synthesis chunks to the caller, gated on the active assistant
/// turn. A chunk whose turn is no longer active is discarded, including
/// chunks already waiting for channel space when a barge-in lands.
async fn forward_chunks(
    mut chunk_rx: mpsc::Receiver<SynthesisChunk>,
    audio_out_tx: mpsc::Sender<SynthesisChunk>,
    active_rx: watch::Receiver<Option<u64>>,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        if *active_rx.borrow() != Some(chunk.turn_id) {
            debug!(
                turn_id = chunk.turn_id,
                chunk_index = chunk.chunk_index,
                "discarding chunk of inactive turn"
            );
            continue;
        }

        let permit = tokio::select! {
            permit = audio_out_tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };
        // Re-check after waiting for space: a barge-in may have landed.
        if *active_rx.borrow() == Some(chunk.turn_id) {
            permit.send(chunk);
        }
    }
}

/// Events responder tasks report back to the turn driver.
enum ResponderEvent {
    FirstDelta {
        turn_id: u64,
    },
    Finished {
        turn_id: u64,
        outcome: TurnOutcome,
        text: String,
    },
}

/// Single-writer driver around the turn machine. Owns the conversation
/// context and all turn-scoped side effects.
struct TurnDriver {
    session_id: SessionId,
    machine: TurnMachine,
    context: ConversationContext,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    events_tx: mpsc::Sender<PipelineEvent>,
    chunk_tx: mpsc::Sender<SynthesisChunk>,
    responder_tx: mpsc::Sender<ResponderEvent>,
    active_turn_tx: watch::Sender<Option<u64>>,
    /// In-flight assistant responder and its cancellation token.
    responder: Option<(u64, CancellationToken)>,
    silence_deadline: Option<tokio::time::Instant>,
    cancel: CancellationToken,
    /// Delivers the final history to [`SessionHandle::close`].
    snapshot_tx: oneshot::Sender<Arc<[CompletedTurn]>>,
    config: Config,
}

impl TurnDriver {
    async fn run(
        mut self,
        mut signal_rx: mpsc::Receiver<TurnSignal>,
        mut transcript_rx: mpsc::Receiver<TranscriptEvent>,
        mut responder_rx: mpsc::Receiver<ResponderEvent>,
    ) {
        let cancel = self.cancel.clone();
        let mut signals_open = true;
        let mut transcripts_open = true;

        loop {
            if !signals_open && !transcripts_open && self.responder.is_none() {
                break;
            }
            let timer_armed = self.silence_deadline.is_some();
            let deadline = self
                .silence_deadline
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = signal_rx.recv(), if signals_open => match signal {
                    Some(signal) => self.feed(signal),
                    None => signals_open = false,
                },
                transcript = transcript_rx.recv(), if transcripts_open => match transcript {
                    Some(event) => self.on_transcript(event),
                    None => transcripts_open = false,
                },
                event = responder_rx.recv() => {
                    if let Some(event) = event {
                        self.on_responder_event(event);
                    }
                }
                _ = tokio::time::sleep_until(deadline), if timer_armed => {
                    debug!(session_id = %self.session_id, "silence timeout fired");
                    self.silence_deadline = None;
                    self.feed(TurnSignal::SilenceTimeout);
                }
            }
        }

        if let Some((_, token)) = &self.responder {
            token.cancel();
        }
        let _ = self.snapshot_tx.send(self.context.snapshot());
    }

    fn feed(&mut self, signal: TurnSignal) {
        for action in self.machine.on_signal(signal) {
            self.apply(action);
        }
    }

    fn on_transcript(&mut self, event: TranscriptEvent) {
        let speaker_label = event
            .speaker_tag
            .as_deref()
            .map(|tag| self.context.label_for(tag));

        if event.is_final {
            self.emit(PipelineEvent::TranscriptFinal {
                utterance_id: event.utterance_id,
                text: event.text.clone(),
                confidence: event.confidence,
                speaker_label,
                degraded: event.error.is_some(),
                emitted_at: event.emitted_at,
            });
            self.feed(TurnSignal::TranscriptFinal {
                utterance_id: event.utterance_id,
                text: event.text,
            });
        } else {
            self.emit(PipelineEvent::TranscriptPartial {
                utterance_id: event.utterance_id,
                text: event.text,
                confidence: event.confidence,
                speaker_label,
                emitted_at: event.emitted_at,
            });
            self.feed(TurnSignal::TranscriptPartial {
                utterance_id: event.utterance_id,
            });
        }
    }

    fn on_responder_event(&mut self, event: ResponderEvent) {
        match event {
            ResponderEvent::FirstDelta { turn_id } => {
                self.feed(TurnSignal::AssistantFirstDelta { turn_id });
            }
            ResponderEvent::Finished {
                turn_id,
                outcome,
                text,
            } => {
                if self.responder.as_ref().is_some_and(|(id, _)| *id == turn_id) {
                    self.responder = None;
                }
                self.feed(TurnSignal::AssistantFinished {
                    turn_id,
                    outcome,
                    text,
                });
            }
        }
    }

    fn apply(&mut self, action: TurnAction) {
        match action {
            TurnAction::StateChanged {
                turn_id,
                speaker,
                state,
            } => {
                self.emit(PipelineEvent::TurnStateChanged {
                    turn_id,
                    speaker,
                    state: state.name(),
                    at: Utc::now(),
                });
            }
            TurnAction::UserTurnOpened { turn_id } => {
                self.emit(PipelineEvent::TurnStarted {
                    turn_id,
                    speaker: Speaker::User,
                    at: Utc::now(),
                });
            }
            TurnAction::ArmSilenceTimer => {
                self.silence_deadline = Some(
                    tokio::time::Instant::now()
                        + Duration::from_millis(self.config.turn.silence_timeout_ms),
                );
            }
            TurnAction::DisarmSilenceTimer => {
                self.silence_deadline = None;
            }
            TurnAction::SubmitAssistantTurn { turn_id, user_text } => {
                self.spawn_responder(turn_id, user_text);
            }
            TurnAction::CancelAssistant { turn_id } => {
                if let Some((id, token)) = &self.responder
                    && *id == turn_id
                {
                    token.cancel();
                }
                // Close the output gate before the responder acks, so
                // queued chunks of the cancelled turn never reach the caller.
                let _ = self.active_turn_tx.send(None);
            }
            TurnAction::RecordUserTurn {
                turn_id,
                text,
                started_at,
            } => {
                self.record_turn(turn_id, Speaker::User, TurnOutcome::Completed, text, started_at);
            }
            TurnAction::RecordAssistantTurn {
                turn_id,
                outcome,
                text,
                started_at,
            } => {
                self.record_turn(turn_id, Speaker::Assistant, outcome, text, started_at);
            }
            TurnAction::AssistantUnavailable { turn_id } => {
                self.emit(PipelineEvent::AssistantUnavailable { turn_id });
            }
        }
    }

    fn record_turn(
        &mut self,
        turn_id: u64,
        speaker: Speaker,
        outcome: TurnOutcome,
        text: String,
        started_at: Instant,
    ) {
        self.context.push_turn(CompletedTurn {
            turn_id,
            speaker,
            text,
            outcome,
            started_at,
            ended_at: Instant::now(),
        });
        self.emit(PipelineEvent::TurnEnded {
            turn_id,
            speaker,
            outcome,
            at: Utc::now(),
        });
    }

    fn spawn_responder(&mut self, turn_id: u64, user_text: String) {
        // Snapshot before the user turn is recorded: the generator sees
        // prior turns in the context and the new text as the prompt.
        let snapshot = self.context.snapshot();
        let token = self.cancel.child_token();
        self.responder = Some((turn_id, token.clone()));
        let _ = self.active_turn_tx.send(Some(turn_id));
        self.emit(PipelineEvent::TurnStarted {
            turn_id,
            speaker: Speaker::Assistant,
            at: Utc::now(),
        });

        let streamer = SynthesisStreamer::new(
            Arc::clone(&self.synthesizer),
            self.config.synthesis.clone(),
        );
        tokio::spawn(respond(
            turn_id,
            user_text,
            snapshot,
            Arc::clone(&self.generator),
            streamer,
            Duration::from_millis(self.config.turn.first_token_timeout_ms),
            self.chunk_tx.clone(),
            self.events_tx.clone(),
            self.responder_tx.clone(),
            token,
        ));
    }

    /// Outward events never block the driver; a full event channel drops.
    fn emit(&self, event: PipelineEvent) {
        if self.events_tx.try_send(event).is_err() {
            warn!(session_id = %self.session_id, "event channel full, dropping event");
        }
    }
}

/// One assistant turn: generate deltas, stream them into synthesis, and
/// report the outcome back to the driver. Always sends a `Finished` event,
/// which doubles as the cancellation acknowledgement.
#[allow(clippy::too_many_arguments)]
async fn respond(
    turn_id: u64,
    user_text: String,
    context: Arc<[CompletedTurn]>,
    generator: Arc<dyn Generator>,
    streamer: SynthesisStreamer,
    first_token_timeout: Duration,
    chunk_tx: mpsc::Sender<SynthesisChunk>,
    events_tx: mpsc::Sender<PipelineEvent>,
    responder_tx: mpsc::Sender<ResponderEvent>,
    cancel: CancellationToken,
) {
    // One first-token budget covers the call itself and the wait for the
    // first delta; a generator that blocks inside generate() is bounded
    // the same way as one that opens a stream and stalls.
    let deadline = tokio::time::Instant::now() + first_token_timeout;

    let opened = tokio::select! {
        _ = cancel.cancelled() => {
            ack_cancelled(turn_id, &responder_tx).await;
            return;
        }
        opened = tokio::time::timeout_at(deadline, generator.generate(&context, &user_text)) => opened,
    };
    let mut stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            fail_turn(turn_id, err.to_string(), &events_tx, &responder_tx).await;
            return;
        }
        Err(_) => {
            fail_turn(
                turn_id,
                format!("no output within {first_token_timeout:?}"),
                &events_tx,
                &responder_tx,
            )
            .await;
            return;
        }
    };

    let first = tokio::select! {
        _ = cancel.cancelled() => {
            ack_cancelled(turn_id, &responder_tx).await;
            return;
        }
        first = tokio::time::timeout_at(deadline, stream.recv()) => first,
    };
    let first_delta = match first {
        Ok(Some(Ok(delta))) => delta,
        Ok(Some(Err(err))) => {
            fail_turn(turn_id, err.to_string(), &events_tx, &responder_tx).await;
            return;
        }
        Ok(None) => {
            fail_turn(
                turn_id,
                "generation stream ended without output".to_string(),
                &events_tx,
                &responder_tx,
            )
            .await;
            return;
        }
        Err(_) => {
            fail_turn(
                turn_id,
                format!("no output within {first_token_timeout:?}"),
                &events_tx,
                &responder_tx,
            )
            .await;
            return;
        }
    };

    let _ = responder_tx
        .send(ResponderEvent::FirstDelta { turn_id })
        .await;

    let (text_tx, text_rx) = mpsc::channel(32);
    let synth_cancel = cancel.child_token();
    let synth_task = tokio::spawn({
        let chunk_tx = chunk_tx.clone();
        let events_tx = events_tx.clone();
        let synth_cancel = synth_cancel.clone();
        async move {
            streamer
                .run(turn_id, text_rx, chunk_tx, events_tx, synth_cancel)
                .await
        }
    });

    let mut full_text = first_delta.clone();
    let mut failure: Option<String> = None;
    let mut cancelled = text_tx.send(first_delta).await.is_err();

    while failure.is_none() && !cancelled {
        tokio::select! {
            _ = cancel.cancelled() => cancelled = true,
            item = stream.recv() => match item {
                Some(Ok(delta)) => {
                    full_text.push_str(&delta);
                    if text_tx.send(delta).await.is_err() {
                        cancelled = true;
                    }
                }
                Some(Err(err)) => failure = Some(err.to_string()),
                None => break,
            }
        }
    }
    drop(stream);
    // A failed or cancelled generation also stops remaining synthesis.
    // Cancel before closing the text channel so the streamer can never
    // treat the aborted stream as a normally finished turn.
    if cancelled || failure.is_some() {
        synth_cancel.cancel();
    }
    drop(text_tx);
    let synth_outcome = synth_task.await.unwrap_or(SynthesisOutcome::Cancelled);

    let outcome = if cancelled {
        TurnOutcome::Cancelled
    } else if let Some(message) = failure {
        warn!(turn_id, %message, "generation failed mid-stream");
        let _ = events_tx.try_send(PipelineEvent::StageError {
            stage: "generation",
            message,
        });
        TurnOutcome::Failed
    } else {
        match synth_outcome {
            SynthesisOutcome::Completed { .. } => TurnOutcome::Completed,
            SynthesisOutcome::Cancelled => TurnOutcome::Cancelled,
        }
    };

    let _ = responder_tx
        .send(ResponderEvent::Finished {
            turn_id,
            outcome,
            text: full_text,
        })
        .await;
}

async fn ack_cancelled(turn_id: u64, responder_tx: &mpsc::Sender<ResponderEvent>) {
    let _ = responder_tx
        .send(ResponderEvent::Finished {
            turn_id,
            outcome: TurnOutcome::Cancelled,
            text: String::new(),
        })
        .await;
}

async fn fail_turn(
    turn_id: u64,
    message: String,
    events_tx: &mpsc::Sender<PipelineEvent>,
    responder_tx: &mpsc::Sender<ResponderEvent>,
) {
    warn!(turn_id, %message, "assistant turn failed");
    let _ = events_tx.try_send(PipelineEvent::StageError {
        stage: "generation",
        message,
    });
    let _ = responder_tx
        .send(ResponderEvent::Finished {
            turn_id,
            outcome: TurnOutcome::Failed,
            text: String::new(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::asr::MockRecognizer;
    use crate::collab::llm::MockGenerator;
    use crate::collab::tts::MockSynthesizer;
    use crate::config::RecognitionConfig;

    fn pipeline_with(config: Config) -> SessionPipeline {
        SessionPipeline::new(
            config,
            Arc::new(MockRecognizer::new()),
            Arc::new(MockGenerator::new()),
            Arc::new(MockSynthesizer::new()),
        )
    }

    #[tokio::test]
    async fn test_start_and_close() {
        let handle = pipeline_with(Config::default()).start().unwrap();
        let id = handle.session_id();
        assert!(!id.is_nil());
        tokio::time::timeout(Duration::from_secs(5), handle.close())
            .await
            .expect("close must not hang");
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = Config {
            recognition: RecognitionConfig {
                max_in_flight: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = pipeline_with(config).start().unwrap_err();
        assert!(matches!(err, VoxchatError::ConfigInvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_malformed_payload_reported_and_session_survives() {
        let mut handle = pipeline_with(Config::default()).start().unwrap();
        let mut events = handle.take_events().unwrap();

        handle.push_audio(vec![0u8; 3]).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            PipelineEvent::StageError { stage: "framer", .. }
        ));

        // The session still accepts audio afterwards.
        handle.push_audio(vec![0u8; 640]).await.unwrap();
        handle.close().await;
    }

    #[tokio::test]
    async fn test_take_streams_only_once() {
        let mut handle = pipeline_with(Config::default()).start().unwrap();
        assert!(handle.take_events().is_some());
        assert!(handle.take_events().is_none());
        assert!(handle.take_audio_out().is_some());
        assert!(handle.take_audio_out().is_none());
        handle.close().await;
    }

    #[tokio::test]
    async fn test_push_audio_after_close_fails() {
        let handle = pipeline_with(Config::default()).start().unwrap();
        let audio_tx = handle.audio_tx.clone();
        handle.close().await;
        // Ingest has exited, so its receiver is gone.
        let err = audio_tx.send(vec![0u8; 2]).await;
        assert!(err.is_err());
    }
}
