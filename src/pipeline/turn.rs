//! Turn manager state machine.
//!
//! Pure event→actions machine: the session driver feeds it signals from
//! the segmenter, the recognition dispatcher, and the assistant responder
//! task, and executes the actions it returns. Keeping it synchronous and
//! side-effect free makes every transition (barge-in included) testable
//! without a runtime.
//!
//! States move only forward:
//! `Idle → UserSpeaking → UserTurnClosing → AssistantThinking →
//! AssistantSpeaking → Idle`, with cancellation reachable from the two
//! assistant states via barge-in.

use crate::pipeline::types::{Speaker, TurnOutcome};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// Conversation state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    UserSpeaking,
    UserTurnClosing,
    AssistantThinking,
    AssistantSpeaking,
}

impl TurnState {
    /// Stable name used in outward events.
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::UserSpeaking => "user_speaking",
            TurnState::UserTurnClosing => "user_turn_closing",
            TurnState::AssistantThinking => "assistant_thinking",
            TurnState::AssistantSpeaking => "assistant_speaking",
        }
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone)]
pub enum TurnSignal {
    /// Segmenter confirmed speech start (drives turn opening and barge-in).
    SpeechStarted { utterance_id: u64 },
    /// Segmenter closed the utterance.
    UtteranceClosed { utterance_id: u64 },
    /// A partial transcript arrived.
    TranscriptPartial { utterance_id: u64 },
    /// A final transcript arrived (possibly degraded to empty text).
    TranscriptFinal { utterance_id: u64, text: String },
    /// The end-of-turn silence timer fired.
    SilenceTimeout,
    /// The responder received the first delta for the assistant turn.
    AssistantFirstDelta { turn_id: u64 },
    /// The responder finished (acknowledges cancellation too).
    AssistantFinished {
        turn_id: u64,
        outcome: TurnOutcome,
        text: String,
    },
}

/// Side effects the driver must perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    /// Announce a state transition.
    StateChanged {
        turn_id: u64,
        speaker: Speaker,
        state: TurnState,
    },
    /// A new user turn opened.
    UserTurnOpened { turn_id: u64 },
    /// (Re)arm the end-of-turn silence timer.
    ArmSilenceTimer,
    /// Disarm the silence timer.
    DisarmSilenceTimer,
    /// Submit the user turn to the generator and start the responder.
    SubmitAssistantTurn {
        turn_id: u64,
        user_text: String,
    },
    /// Cancel the in-flight assistant turn (token + responder).
    CancelAssistant { turn_id: u64 },
    /// Record the finished user turn in the conversation context.
    RecordUserTurn {
        turn_id: u64,
        text: String,
        started_at: Instant,
    },
    /// Record the finished assistant turn in the conversation context.
    RecordAssistantTurn {
        turn_id: u64,
        outcome: TurnOutcome,
        text: String,
        started_at: Instant,
    },
    /// Surface the explicit "unable to respond" signal.
    AssistantUnavailable { turn_id: u64 },
}

/// Accumulating user turn.
#[derive(Debug)]
struct UserTurn {
    turn_id: u64,
    started_at: Instant,
    /// Utterances opened and not yet closed by the segmenter.
    open_utterances: HashSet<u64>,
    /// Utterances closed but still awaiting a final transcript.
    awaiting_final: HashSet<u64>,
    /// Final texts in utterance order.
    finals: BTreeMap<u64, String>,
}

impl UserTurn {
    fn text(&self) -> String {
        let parts: Vec<&str> = self
            .finals
            .values()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        parts.join(" ")
    }
}

/// In-flight assistant turn bookkeeping. Survives barge-in until the
/// responder acknowledges, so the cancelled turn is still recorded.
#[derive(Debug)]
struct AssistantTurn {
    turn_id: u64,
    started_at: Instant,
    cancelled: bool,
}

/// The turn state machine.
pub struct TurnMachine {
    state: TurnState,
    next_turn_id: u64,
    user: Option<UserTurn>,
    assistant: Option<AssistantTurn>,
    /// Cancelled turns displaced by a newer submit, still awaiting ack.
    pending_cancelled: Vec<AssistantTurn>,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            next_turn_id: 0,
            user: None,
            assistant: None,
            pending_cancelled: Vec::new(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Turn id of the assistant turn currently allowed to speak, if any.
    /// Barge-in clears this immediately, before the responder acks.
    pub fn active_assistant_turn(&self) -> Option<u64> {
        self.assistant
            .as_ref()
            .filter(|a| !a.cancelled)
            .map(|a| a.turn_id)
    }

    /// Feeds one signal and returns the actions to perform.
    pub fn on_signal(&mut self, signal: TurnSignal) -> Vec<TurnAction> {
        let mut actions = Vec::new();
        match signal {
            TurnSignal::SpeechStarted { utterance_id } => {
                self.on_speech_started(utterance_id, &mut actions)
            }
            TurnSignal::UtteranceClosed { utterance_id } => {
                self.on_utterance_closed(utterance_id, &mut actions)
            }
            TurnSignal::TranscriptPartial { utterance_id } => {
                self.on_transcript_partial(utterance_id, &mut actions)
            }
            TurnSignal::TranscriptFinal { utterance_id, text } => {
                self.on_transcript_final(utterance_id, text, &mut actions)
            }
            TurnSignal::SilenceTimeout => self.on_silence_timeout(&mut actions),
            TurnSignal::AssistantFirstDelta { turn_id } => {
                self.on_first_delta(turn_id, &mut actions)
            }
            TurnSignal::AssistantFinished {
                turn_id,
                outcome,
                text,
            } => self.on_assistant_finished(turn_id, outcome, text, &mut actions),
        }
        actions
    }

    fn on_speech_started(&mut self, utterance_id: u64, actions: &mut Vec<TurnAction>) {
        match self.state {
            TurnState::Idle => self.open_user_turn(utterance_id, actions),
            TurnState::UserSpeaking => {
                if let Some(user) = self.user.as_mut() {
                    user.open_utterances.insert(utterance_id);
                }
            }
            TurnState::UserTurnClosing => {
                // The user kept talking: the turn reopens.
                if let Some(user) = self.user.as_mut() {
                    user.open_utterances.insert(utterance_id);
                }
                actions.push(TurnAction::DisarmSilenceTimer);
                self.transition(TurnState::UserSpeaking, actions);
            }
            TurnState::AssistantThinking | TurnState::AssistantSpeaking => {
                // Barge-in: cancel the assistant turn, then start the
                // user's. The assistant slot stays until the responder
                // acknowledges so the turn is recorded exactly once.
                if let Some(assistant) = self.assistant.as_mut() {
                    assistant.cancelled = true;
                    debug!(turn_id = assistant.turn_id, "barge-in cancels assistant turn");
                    actions.push(TurnAction::CancelAssistant {
                        turn_id: assistant.turn_id,
                    });
                }
                self.open_user_turn(utterance_id, actions);
            }
        }
    }

    fn on_utterance_closed(&mut self, utterance_id: u64, actions: &mut Vec<TurnAction>) {
        let Some(user) = self.user.as_mut() else {
            return;
        };
        user.open_utterances.remove(&utterance_id);
        if !user.finals.contains_key(&utterance_id) {
            user.awaiting_final.insert(utterance_id);
        }

        if self.state == TurnState::UserSpeaking && user.open_utterances.is_empty() {
            // VAD went silent: the turn starts closing. The silence
            // timer bounds both the wait for straggling finals and the
            // window in which the user may resume.
            self.transition(TurnState::UserTurnClosing, actions);
            actions.push(TurnAction::ArmSilenceTimer);
            self.try_finish_closing(actions);
        }
    }

    fn on_transcript_partial(&mut self, utterance_id: u64, actions: &mut Vec<TurnAction>) {
        // Partials only matter for opening a turn that VAD missed.
        if self.state == TurnState::Idle {
            self.open_user_turn(utterance_id, actions);
        }
    }

    fn on_transcript_final(
        &mut self,
        utterance_id: u64,
        text: String,
        actions: &mut Vec<TurnAction>,
    ) {
        match self.state {
            TurnState::Idle => {
                if text.trim().is_empty() {
                    // Degraded or empty final with no open turn: nothing
                    // to respond to.
                    debug!(utterance_id, "ignoring empty final in idle");
                    return;
                }
                // A final with no preceding speech-start: open and
                // immediately begin closing, since VAD saw nothing.
                self.open_user_turn(utterance_id, actions);
                if let Some(user) = self.user.as_mut() {
                    user.open_utterances.remove(&utterance_id);
                    user.finals.insert(utterance_id, text);
                }
                self.transition(TurnState::UserTurnClosing, actions);
                actions.push(TurnAction::ArmSilenceTimer);
                self.try_finish_closing(actions);
            }
            TurnState::UserSpeaking => {
                if let Some(user) = self.user.as_mut() {
                    user.awaiting_final.remove(&utterance_id);
                    user.finals.insert(utterance_id, text);
                }
            }
            TurnState::UserTurnClosing => {
                if let Some(user) = self.user.as_mut() {
                    user.awaiting_final.remove(&utterance_id);
                    user.finals.insert(utterance_id, text);
                }
                self.try_finish_closing(actions);
            }
            TurnState::AssistantThinking | TurnState::AssistantSpeaking => {
                // Late final for an already-submitted turn: the turn
                // proceeded without it, discard.
                debug!(utterance_id, "discarding late final transcript");
            }
        }
    }

    fn on_silence_timeout(&mut self, actions: &mut Vec<TurnAction>) {
        if self.state == TurnState::UserTurnClosing {
            // Force closure without the missing finals.
            self.finish_closing(actions);
        }
    }

    fn on_first_delta(&mut self, turn_id: u64, actions: &mut Vec<TurnAction>) {
        // A cancelled turn never reaches AssistantSpeaking.
        if self.state == TurnState::AssistantThinking
            && self.active_assistant_turn() == Some(turn_id)
        {
            self.transition(TurnState::AssistantSpeaking, actions);
        }
    }

    fn on_assistant_finished(
        &mut self,
        turn_id: u64,
        outcome: TurnOutcome,
        text: String,
        actions: &mut Vec<TurnAction>,
    ) {
        let assistant = if let Some(assistant) = self.assistant.take_if(|a| a.turn_id == turn_id) {
            assistant
        } else if let Some(pos) = self
            .pending_cancelled
            .iter()
            .position(|a| a.turn_id == turn_id)
        {
            self.pending_cancelled.remove(pos)
        } else {
            debug!(turn_id, "finish signal for unknown assistant turn");
            return;
        };

        // A barged-in responder may report Completed if it raced the
        // cancel; the recorded outcome stays Cancelled.
        let outcome = if assistant.cancelled {
            TurnOutcome::Cancelled
        } else {
            outcome
        };

        actions.push(TurnAction::RecordAssistantTurn {
            turn_id,
            outcome,
            text,
            started_at: assistant.started_at,
        });
        if outcome == TurnOutcome::Failed {
            actions.push(TurnAction::AssistantUnavailable { turn_id });
        }

        // After barge-in the machine already moved on to the user turn.
        if !assistant.cancelled
            && matches!(
                self.state,
                TurnState::AssistantThinking | TurnState::AssistantSpeaking
            )
        {
            self.transition(TurnState::Idle, actions);
        }
    }

    fn open_user_turn(&mut self, utterance_id: u64, actions: &mut Vec<TurnAction>) {
        let turn_id = self.alloc_turn_id();
        let mut open_utterances = HashSet::new();
        open_utterances.insert(utterance_id);
        self.user = Some(UserTurn {
            turn_id,
            started_at: Instant::now(),
            open_utterances,
            awaiting_final: HashSet::new(),
            finals: BTreeMap::new(),
        });
        actions.push(TurnAction::UserTurnOpened { turn_id });
        actions.push(TurnAction::DisarmSilenceTimer);
        self.transition(TurnState::UserSpeaking, actions);
    }

    fn try_finish_closing(&mut self, actions: &mut Vec<TurnAction>) {
        let ready = self
            .user
            .as_ref()
            .is_some_and(|user| user.awaiting_final.is_empty());
        if ready {
            self.finish_closing(actions);
        }
    }

    fn finish_closing(&mut self, actions: &mut Vec<TurnAction>) {
        let Some(user) = self.user.take() else {
            return;
        };
        actions.push(TurnAction::DisarmSilenceTimer);

        let user_text = user.text();
        let assistant_turn_id = self.alloc_turn_id();
        // A barged-in turn may still be awaiting its responder ack when
        // the next turn submits; keep it so the ack still records it.
        if let Some(prior) = self.assistant.take() {
            self.pending_cancelled.push(prior);
        }
        self.assistant = Some(AssistantTurn {
            turn_id: assistant_turn_id,
            started_at: Instant::now(),
            cancelled: false,
        });

        self.transition(TurnState::AssistantThinking, actions);
        // The submit carries the text; the snapshot for the generator is
        // taken before the user turn is recorded, so the context holds
        // prior turns only.
        actions.push(TurnAction::SubmitAssistantTurn {
            turn_id: assistant_turn_id,
            user_text: user_text.clone(),
        });
        actions.push(TurnAction::RecordUserTurn {
            turn_id: user.turn_id,
            text: user_text,
            started_at: user.started_at,
        });
    }

    fn transition(&mut self, next: TurnState, actions: &mut Vec<TurnAction>) {
        debug!(from = self.state.name(), to = next.name(), "turn transition");
        self.state = next;
        let (turn_id, speaker) = match next {
            TurnState::AssistantThinking | TurnState::AssistantSpeaking => (
                self.assistant.as_ref().map(|a| a.turn_id).unwrap_or(0),
                Speaker::Assistant,
            ),
            // Idle is only re-entered when an assistant turn finishes;
            // that turn is the most recently allocated id.
            TurnState::Idle => (self.next_turn_id.saturating_sub(1), Speaker::Assistant),
            _ => (
                self.user.as_ref().map(|u| u.turn_id).unwrap_or(0),
                Speaker::User,
            ),
        };
        actions.push(TurnAction::StateChanged {
            turn_id,
            speaker,
            state: next,
        });
    }

    fn alloc_turn_id(&mut self) -> u64 {
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        id
    }
}
