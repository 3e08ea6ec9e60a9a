//! Voice-activity segmenter.
//!
//! Classifies frames as speech or silence through a pluggable detector
//! score plus a hysteresis state machine, and assembles unbroken speech
//! spans into utterances. Handoff to recognition goes through a bounded
//! queue that sheds the oldest completed utterance under backpressure,
//! never the one still being assembled.

use crate::config::SegmenterConfig;
use crate::pipeline::types::{AudioFrame, SessionId, Utterance};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-frame speech scoring, pluggable so a model-based detector can
/// replace the energy heuristic without touching the state machine.
pub trait SpeechDetector: Send + Sync {
    /// Returns a speech likelihood score in 0.0..=1.0 for the samples.
    fn score(&self, samples: &[i16]) -> f32;
}

/// Default detector: normalized RMS energy of the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyDetector;

impl SpeechDetector for EnergyDetector {
    fn score(&self, samples: &[i16]) -> f32 {
        rms_level(samples)
    }
}

/// Normalized RMS of 16-bit samples: 0.0 is silence, 1.0 full scale.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    ((sum_squares / samples.len() as f64).sqrt()) as f32
}

/// Hysteresis phase of the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silence,
    Speech,
}

/// Events produced while consuming frames.
#[derive(Debug)]
pub enum SegmentEvent {
    /// Speech start confirmed after the debounce window; the utterance is
    /// now open. Used by the turn manager for barge-in detection.
    SpeechStarted { utterance_id: u64 },
    /// The utterance closed (silence confirmed or max duration hit).
    UtteranceClosed(Utterance),
}

/// Segments a frame stream into utterances.
pub struct Segmenter<D: SpeechDetector = EnergyDetector> {
    config: SegmenterConfig,
    detector: D,
    session_id: SessionId,
    phase: Phase,
    /// Consecutive above-threshold frames while in silence.
    above_run: u32,
    /// Consecutive below-threshold frames while in speech.
    below_run: u32,
    /// Debounce frames observed before speech confirmation; they belong
    /// to the utterance once it opens.
    pending: Vec<AudioFrame>,
    /// Frames of the currently open utterance.
    current: Vec<AudioFrame>,
    next_utterance_id: u64,
    current_utterance_id: u64,
    expected_sequence: Option<u64>,
}

impl Segmenter<EnergyDetector> {
    /// Creates a segmenter with the default energy detector.
    pub fn new(session_id: SessionId, config: SegmenterConfig) -> Self {
        Self::with_detector(session_id, config, EnergyDetector)
    }
}

impl<D: SpeechDetector> Segmenter<D> {
    /// Creates a segmenter with a custom speech detector.
    pub fn with_detector(session_id: SessionId, config: SegmenterConfig, detector: D) -> Self {
        Self {
            config,
            detector,
            session_id,
            phase: Phase::Silence,
            above_run: 0,
            below_run: 0,
            pending: Vec::new(),
            current: Vec::new(),
            next_utterance_id: 0,
            current_utterance_id: 0,
            expected_sequence: None,
        }
    }

    /// Consumes one frame and returns any segment events it triggers.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Vec<SegmentEvent> {
        self.check_sequence(&frame);

        let is_speech = self.detector.score(&frame.samples) > self.config.speech_threshold;
        let mut events = Vec::new();

        match self.phase {
            Phase::Silence => {
                if is_speech {
                    self.above_run += 1;
                    self.pending.push(frame);
                    if self.above_run >= self.config.start_frames {
                        self.open_utterance(&mut events);
                    }
                } else {
                    self.above_run = 0;
                    self.pending.clear();
                }
            }
            Phase::Speech => {
                self.current.push(frame);
                if is_speech {
                    self.below_run = 0;
                } else {
                    self.below_run += 1;
                    if self.below_run >= self.config.end_frames {
                        events.push(self.close_utterance());
                        return events;
                    }
                }
                if self.current_duration_ms() >= self.config.max_utterance_ms {
                    debug!(
                        utterance_id = self.current_utterance_id,
                        "max utterance duration reached, forcing close"
                    );
                    events.push(self.close_utterance());
                    if is_speech {
                        // Speech is still ongoing: roll straight into a
                        // fresh utterance so nothing is lost.
                        self.open_utterance(&mut events);
                    }
                }
            }
        }

        events
    }

    /// Closes any open utterance at session teardown. Every opened
    /// utterance is closed exactly once.
    pub fn flush(&mut self) -> Option<SegmentEvent> {
        if self.phase == Phase::Speech {
            Some(self.close_utterance())
        } else {
            None
        }
    }

    /// True while an utterance is open.
    pub fn in_speech(&self) -> bool {
        self.phase == Phase::Speech
    }

    fn open_utterance(&mut self, events: &mut Vec<SegmentEvent>) {
        self.phase = Phase::Speech;
        self.current_utterance_id = self.next_utterance_id;
        self.next_utterance_id += 1;
        self.current = std::mem::take(&mut self.pending);
        self.above_run = 0;
        self.below_run = 0;
        events.push(SegmentEvent::SpeechStarted {
            utterance_id: self.current_utterance_id,
        });
    }

    fn close_utterance(&mut self) -> SegmentEvent {
        let frames = std::mem::take(&mut self.current);
        let start_sequence = frames.first().map(|f| f.sequence).unwrap_or(0);
        let end_sequence = frames.last().map(|f| f.sequence).unwrap_or(start_sequence);
        self.phase = Phase::Silence;
        self.above_run = 0;
        self.below_run = 0;
        SegmentEvent::UtteranceClosed(Utterance {
            session_id: self.session_id,
            utterance_id: self.current_utterance_id,
            start_sequence,
            end_sequence,
            frames,
        })
    }

    fn current_duration_ms(&self) -> u32 {
        self.current.iter().map(|f| f.duration_ms).sum()
    }

    fn check_sequence(&mut self, frame: &AudioFrame) {
        if let Some(expected) = self.expected_sequence
            && frame.sequence != expected
        {
            // Dropped frames upstream: logged, not fatal.
            warn!(
                expected,
                got = frame.sequence,
                "frame sequence gap detected"
            );
        }
        self.expected_sequence = Some(frame.sequence + 1);
    }
}

/// Bounded handoff queue between the segmenter and the recognition
/// dispatcher. The segmenter never blocks on downstream stages: when the
/// channel and the local overflow buffer are both full, the oldest
/// completed utterance is dropped and returned for reporting.
pub struct UtteranceQueue {
    tx: mpsc::Sender<Utterance>,
    overflow: VecDeque<Utterance>,
    capacity: usize,
}

impl UtteranceQueue {
    pub fn new(tx: mpsc::Sender<Utterance>, capacity: usize) -> Self {
        Self {
            tx,
            overflow: VecDeque::new(),
            capacity,
        }
    }

    /// Offers a completed utterance, returning any utterances shed to
    /// make room (oldest first).
    pub fn offer(&mut self, utterance: Utterance) -> Vec<Utterance> {
        self.overflow.push_back(utterance);
        self.drain();
        let mut dropped = Vec::new();
        while self.overflow.len() > self.capacity {
            if let Some(oldest) = self.overflow.pop_front() {
                dropped.push(oldest);
            }
        }
        dropped
    }

    /// Pushes buffered utterances into the channel without blocking.
    pub fn drain(&mut self) {
        while let Some(utterance) = self.overflow.pop_front() {
            match self.tx.try_send(utterance) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(back)) => {
                    self.overflow.push_front(back);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.overflow.clear();
                    break;
                }
            }
        }
    }

    /// Completed utterances waiting locally for channel space.
    pub fn backlog(&self) -> usize {
        self.overflow.len()
    }
}
