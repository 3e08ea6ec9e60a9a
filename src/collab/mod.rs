//! External collaborator contracts.
//!
//! The recognition, generation, and synthesis engines are black boxes
//! behind these traits. Each trait has a mock implementation used by the
//! pipeline tests; real backends live outside this crate.

pub mod asr;
pub mod llm;
pub mod tts;

pub use asr::{MockRecognizer, RecognitionUpdate, Recognizer};
pub use llm::{Generator, MockGenerator};
pub use tts::{MockSynthesizer, Synthesizer, VoiceParams};
