//! The streaming conversation pipeline.
//!
//! Stages run as independent tasks over bounded channels:
//! framer → segmenter → recognition dispatcher → turn driver → synthesis.
//! [`session`] wires them together for one conversation.

pub mod framer;
pub mod recognizer;
pub mod segmenter;
pub mod session;
pub mod synthesis;
pub mod turn;
pub mod types;

pub use framer::FrameAssembler;
pub use recognizer::RecognitionDispatcher;
pub use segmenter::{EnergyDetector, SegmentEvent, Segmenter, SpeechDetector, UtteranceQueue};
pub use session::{SessionHandle, SessionPipeline};
pub use synthesis::{ChunkSplitter, SynthesisOutcome, SynthesisStreamer};
pub use turn::{TurnAction, TurnMachine, TurnSignal, TurnState};
pub use types::{
    AudioFrame, PipelineEvent, SessionId, Speaker, SynthesisChunk, TranscriptEvent, TurnOutcome,
    Utterance,
};
