//! Default configuration constants for voxchat.
//!
//! Shared constants used across configuration types to keep tuning values
//! in one place. All of these can be overridden through [`crate::Config`].

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and keeps frame sizes
/// small enough for the sub-second latency budget.
pub const SAMPLE_RATE: u32 = 16000;

/// Default duration of one audio frame in milliseconds.
///
/// Incoming transport payloads are re-chunked into frames of this length.
/// 20ms matches common packetization intervals and gives the segmenter
/// fine-grained speech/silence resolution.
pub const FRAME_DURATION_MS: u32 = 20;

/// Default speech-energy threshold (0.0 to 1.0) for the segmenter.
///
/// Frames whose detector score exceeds this are counted as speech.
/// 0.02 is tuned for typical microphone input levels.
pub const SPEECH_THRESHOLD: f32 = 0.02;

/// Consecutive above-threshold frames required to confirm speech start.
///
/// Debounces against short noise bursts. 3 frames at 20ms means speech
/// is confirmed within 60ms of onset.
pub const SPEECH_START_FRAMES: u32 = 3;

/// Consecutive below-threshold frames required to confirm speech end.
///
/// 25 frames at 20ms is 500ms of silence, enough to survive short pauses
/// within a phrase without splitting it into separate utterances.
pub const SPEECH_END_FRAMES: u32 = 25;

/// Maximum utterance duration in milliseconds before a forced close.
///
/// Guards against runaway floor noise keeping an utterance open forever.
pub const MAX_UTTERANCE_MS: u32 = 30_000;

/// Capacity of the utterance handoff queue between segmenter and
/// recognition dispatcher. When full, the oldest completed utterance
/// is shed and reported as a backpressure drop.
pub const UTTERANCE_QUEUE_CAPACITY: usize = 8;

/// Default language hint for recognition ("auto" = let the recognizer
/// detect the spoken language).
pub const LANGUAGE: &str = "auto";

/// Maximum concurrent in-flight recognition requests per session.
///
/// 1 preserves ordering of partial results. Raise only if the recognizer
/// guarantees per-utterance ordering tags.
pub const RECOGNITION_MAX_IN_FLIGHT: usize = 1;

/// Per-attempt recognition timeout in milliseconds.
pub const RECOGNITION_TIMEOUT_MS: u64 = 8_000;

/// Recognition retry budget after the first attempt fails.
pub const RECOGNITION_MAX_RETRIES: u32 = 1;

/// Base delay for exponential recognition retry backoff, in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Cap on the exponential retry backoff delay, in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 4_000;

/// End-of-turn silence timeout in milliseconds.
///
/// Once the user's last utterance has closed, the turn is forced shut
/// after this much silence even if a final transcript is still pending.
pub const SILENCE_TIMEOUT_MS: u64 = 1_200;

/// Timeout for the first token from the language-model collaborator,
/// in milliseconds. Exceeding it fails the assistant turn.
pub const FIRST_TOKEN_TIMEOUT_MS: u64 = 10_000;

/// Default synthesis voice identifier.
pub const VOICE: &str = "default";

/// Default speech speed multiplier for synthesis.
pub const SPEECH_SPEED: f32 = 1.0;

/// Default synthesis output sample rate in Hz.
pub const SYNTHESIS_SAMPLE_RATE: u32 = 22_050;

/// Minimum characters accumulated before a synthesis chunk boundary
/// is accepted. Avoids synthesizing tiny fragments with poor prosody.
pub const MIN_CHUNK_CHARS: usize = 24;

/// Hard cap on synthesis chunk length in characters. A chunk is cut at
/// the last clause boundary (or whitespace) before this limit.
pub const MAX_CHUNK_CHARS: usize = 280;

/// Per-chunk synthesis timeout in milliseconds. A chunk that misses it
/// is replaced by a silence-fill marker rather than stalling the turn.
pub const CHUNK_TIMEOUT_MS: u64 = 5_000;

/// Maximum synthesis requests in flight at once. Bounds the reorder
/// buffer that restores chunk-index order at the output.
pub const SYNTHESIS_MAX_PARALLEL: usize = 3;

/// Maximum completed turns retained in the conversation history window.
pub const HISTORY_MAX_TURNS: usize = 32;

/// Maximum age in seconds of a retained history turn. 0 disables
/// age-based eviction.
pub const HISTORY_MAX_AGE_SECS: u64 = 0;

/// Capacity of the raw audio payload channel from the transport.
pub const AUDIO_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outward structured event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Capacity of the transcript event channel into the turn manager.
pub const TRANSCRIPT_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the synthesized audio chunk channel to the output sink.
pub const CHUNK_CHANNEL_CAPACITY: usize = 32;
