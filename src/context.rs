//! Per-session conversation context.
//!
//! Owns the completed-turn history and diarization labels. Append-only,
//! mutated by a single writer (the turn driver); other stages read
//! snapshots. Retention is a bounded window by turn count and age.

use crate::config::HistoryConfig;
use crate::pipeline::types::{Speaker, TurnOutcome};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// One finished turn as retained in the history window.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub turn_id: u64,
    pub speaker: Speaker,
    pub text: String,
    pub outcome: TurnOutcome,
    pub started_at: Instant,
    pub ended_at: Instant,
}

/// Bounded, append-only conversation history plus speaker labels.
pub struct ConversationContext {
    config: HistoryConfig,
    turns: VecDeque<CompletedTurn>,
    labels: HashMap<String, String>,
    clock: Arc<dyn Clock>,
}

impl ConversationContext {
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a context with a custom clock (for deterministic testing).
    pub fn with_clock(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            turns: VecDeque::new(),
            labels: HashMap::new(),
            clock,
        }
    }

    /// Appends a completed turn and evicts anything outside the window.
    pub fn push_turn(&mut self, turn: CompletedTurn) {
        self.turns.push_back(turn);
        self.evict();
    }

    /// Snapshot of the retained turns, oldest first. Cheap to clone and
    /// safe to hand to collaborator calls while the writer keeps going.
    pub fn snapshot(&self) -> Arc<[CompletedTurn]> {
        self.turns.iter().cloned().collect()
    }

    /// Number of turns currently retained.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when no turns are retained.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Stable display label for a diarization tag. Tags are assigned
    /// labels in first-seen order and keep them for the session.
    pub fn label_for(&mut self, tag: &str) -> String {
        if let Some(label) = self.labels.get(tag) {
            return label.clone();
        }
        let label = format!("speaker-{}", self.labels.len() + 1);
        self.labels.insert(tag.to_string(), label.clone());
        label
    }

    fn evict(&mut self) {
        while self.turns.len() > self.config.max_turns {
            self.turns.pop_front();
        }
        if self.config.max_age_secs > 0 {
            let cutoff = Duration::from_secs(self.config.max_age_secs);
            let now = self.clock.now();
            while let Some(front) = self.turns.front() {
                if now.duration_since(front.ended_at) > cutoff {
                    self.turns.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}
