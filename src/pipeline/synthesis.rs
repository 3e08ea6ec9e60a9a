//! Synthesis streamer.
//!
//! Splits the generator's delta stream into prosody-friendly text chunks,
//! synthesizes up to `max_parallel` chunks concurrently, and re-emits the
//! audio strictly in chunk order. A chunk that times out or fails is
//! replaced with silence so one bad chunk never stalls the turn.

use crate::collab::tts::{Synthesizer, VoiceParams};
use crate::config::SynthesisConfig;
use crate::pipeline::types::{PipelineEvent, SynthesisChunk};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Duration of the silence substituted for a failed chunk.
const SILENCE_FILL_MS: u32 = 200;

/// Splits streamed text into chunks at sentence boundaries.
///
/// A chunk is released as soon as it ends on a sentence boundary and is
/// at least `min_chars` long. Text that grows past `max_chars` without a
/// sentence boundary is cut at a clause boundary, then at whitespace,
/// then hard at `max_chars`.
pub struct ChunkSplitter {
    buffer: String,
    min_chars: usize,
    max_chars: usize,
}

impl ChunkSplitter {
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chars,
            max_chars,
        }
    }

    /// Appends a delta and returns any chunks that became ready.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut ready = Vec::new();
        while let Some(chunk) = self.next_chunk() {
            ready.push(chunk);
        }
        ready
    }

    /// Returns the remaining buffered text, if any. Call after the delta
    /// stream ends.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        let tail = tail.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    fn next_chunk(&mut self) -> Option<String> {
        let char_count = self.buffer.chars().count();
        if char_count < self.min_chars {
            return None;
        }
        if let Some(cut) = self.find_cut(&['.', '!', '?']) {
            return Some(self.take(cut));
        }
        if char_count <= self.max_chars {
            // No sentence boundary yet; wait for more text.
            return None;
        }
        if let Some(cut) = self.find_cut(&[';', ':', ',']) {
            return Some(self.take(cut));
        }
        Some(self.hard_cut())
    }

    /// Byte position after the first delimiter that yields a chunk within
    /// `[min_chars, max_chars]`. The earliest qualifying boundary wins,
    /// keeping time-to-first-audio low.
    fn find_cut(&self, delimiters: &[char]) -> Option<usize> {
        for (count, (byte_idx, ch)) in self.buffer.char_indices().enumerate() {
            if count >= self.max_chars {
                break;
            }
            if delimiters.contains(&ch) && count + 1 >= self.min_chars {
                return Some(byte_idx + ch.len_utf8());
            }
        }
        None
    }

    fn hard_cut(&mut self) -> String {
        let mut last_ws = None;
        let mut boundary = self.buffer.len();
        for (count, (byte_idx, ch)) in self.buffer.char_indices().enumerate() {
            if count >= self.max_chars {
                boundary = byte_idx;
                break;
            }
            if ch.is_whitespace() && count + 1 >= self.min_chars {
                last_ws = Some(byte_idx);
            }
        }
        self.take(last_ws.unwrap_or(boundary))
    }

    fn take(&mut self, cut: usize) -> String {
        let rest = self.buffer.split_off(cut);
        let chunk = std::mem::replace(&mut self.buffer, rest.trim_start().to_string());
        chunk.trim_end().to_string()
    }
}

/// How a synthesis run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Completed { chunks: u64 },
    Cancelled,
}

/// Streams one assistant turn's text through the synthesizer.
pub struct SynthesisStreamer {
    synthesizer: Arc<dyn Synthesizer>,
    config: SynthesisConfig,
}

impl SynthesisStreamer {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, config: SynthesisConfig) -> Self {
        Self {
            synthesizer,
            config,
        }
    }

    /// Consumes the delta stream for `turn_id` and emits ordered audio
    /// chunks until the stream ends or the token cancels.
    ///
    /// The final chunk carries `is_final`; a turn whose text produced no
    /// chunks still emits one empty final chunk so downstream observes
    /// turn completion.
    pub async fn run(
        &self,
        turn_id: u64,
        mut text_rx: mpsc::Receiver<String>,
        chunk_tx: mpsc::Sender<SynthesisChunk>,
        events_tx: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> SynthesisOutcome {
        let voice = VoiceParams::from(&self.config);
        let chunk_timeout = Duration::from_millis(self.config.chunk_timeout_ms);
        let mut splitter = ChunkSplitter::new(self.config.min_chunk_chars, self.config.max_chunk_chars);

        let mut pending: VecDeque<(u64, String)> = VecDeque::new();
        let mut tasks: JoinSet<(u64, crate::Result<Vec<u8>>)> = JoinSet::new();
        let mut completed: BTreeMap<u64, (Vec<u8>, bool)> = BTreeMap::new();
        let mut next_index: u64 = 0;
        let mut next_emit: u64 = 0;
        let mut total: Option<u64> = None;
        let mut text_open = true;

        loop {
            while tasks.len() < self.config.max_parallel {
                let Some((index, text)) = pending.pop_front() else {
                    break;
                };
                let synthesizer = Arc::clone(&self.synthesizer);
                let voice = voice.clone();
                tasks.spawn(async move {
                    let result =
                        match tokio::time::timeout(chunk_timeout, synthesizer.synthesize(&text, &voice))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(crate::VoxchatError::Synthesis {
                                message: format!("chunk timed out after {chunk_timeout:?}"),
                            }),
                        };
                    (index, result)
                });
            }

            // Emit everything that is ready, in order. A chunk is held
            // until it is known whether it is the last of the turn.
            while let Some((audio, silence_fill)) = completed.remove(&next_emit) {
                let is_last = total == Some(next_emit + 1);
                if !is_last && total.is_none() && next_index <= next_emit + 1 {
                    completed.insert(next_emit, (audio, silence_fill));
                    break;
                }
                let chunk = SynthesisChunk {
                    turn_id,
                    chunk_index: next_emit,
                    audio,
                    is_final: is_last,
                    silence_fill,
                };
                if chunk_tx.send(chunk).await.is_err() {
                    tasks.abort_all();
                    return SynthesisOutcome::Cancelled;
                }
                next_emit += 1;
            }

            if let Some(total) = total
                && next_emit >= total
                && pending.is_empty()
                && tasks.is_empty()
            {
                break;
            }

            tokio::select! {
                // Cancellation wins over pending work so a cancelled turn
                // cannot slip out a closing chunk.
                biased;
                _ = cancel.cancelled() => {
                    debug!(turn_id, "synthesis cancelled");
                    tasks.abort_all();
                    return SynthesisOutcome::Cancelled;
                }
                delta = text_rx.recv(), if text_open => {
                    match delta {
                        Some(text) => {
                            for chunk in splitter.push(&text) {
                                pending.push_back((next_index, chunk));
                                next_index += 1;
                            }
                        }
                        None => {
                            text_open = false;
                            if let Some(tail) = splitter.flush() {
                                pending.push_back((next_index, tail));
                                next_index += 1;
                            }
                            total = Some(next_index);
                        }
                    }
                }
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Some(Ok((index, Ok(audio)))) => {
                            completed.insert(index, (audio, false));
                        }
                        Some(Ok((index, Err(err)))) => {
                            warn!(turn_id, chunk_index = index, error = %err, "chunk synthesis failed, substituting silence");
                            let _ = events_tx.try_send(PipelineEvent::StageError {
                                stage: "synthesis",
                                message: err.to_string(),
                            });
                            completed.insert(index, (self.silence_audio(), true));
                        }
                        Some(Err(join_err)) => {
                            warn!(turn_id, error = %join_err, "synthesis task aborted");
                        }
                        None => {}
                    }
                }
            }
        }

        if total == Some(0) {
            // The turn's text produced no chunks; still mark completion.
            let _ = chunk_tx
                .send(SynthesisChunk {
                    turn_id,
                    chunk_index: 0,
                    audio: Vec::new(),
                    is_final: true,
                    silence_fill: false,
                })
                .await;
        }

        SynthesisOutcome::Completed {
            chunks: total.unwrap_or(next_emit),
        }
    }

    /// Zeroed 16-bit PCM covering [`SILENCE_FILL_MS`].
    fn silence_audio(&self) -> Vec<u8> {
        let samples = (self.config.sample_rate * SILENCE_FILL_MS / 1000) as usize;
        vec![0u8; samples * 2]
    }
}
