//! voxchat - Streaming voice conversation pipeline
//!
//! Turns a raw audio stream into a spoken back-and-forth: voice activity
//! segmentation, streaming recognition, turn management with barge-in,
//! and incremental speech synthesis, orchestrated per session.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod collab;
pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod retry;

// Collaborator traits (audio in → text → text → audio out)
pub use collab::asr::{RecognitionUpdate, Recognizer};
pub use collab::llm::Generator;
pub use collab::tts::{Synthesizer, VoiceParams};

// Session entry points
pub use pipeline::session::{SessionHandle, SessionPipeline};
pub use pipeline::types::{PipelineEvent, SessionId, SynthesisChunk, TurnOutcome};

// Error handling
pub use error::{Result, VoxchatError};

// Config
pub use config::Config;

// Conversation history
pub use context::{Clock, CompletedTurn, ConversationContext, SystemClock};

// Retry policy shared by dispatch stages
pub use retry::RetryPolicy;
