//! Model handles
//!
//! The pipeline only sees these traits; weights and runtimes stay
//! opaque. One concrete engine ships with the crate: an ONNX CTC
//! acoustic model that serves both transcription (greedy decode) and
//! forced alignment (per-frame log-probabilities).

pub mod vocab;
pub mod wav2vec2;

use crate::error::Result;
use ndarray::Array2;

pub use vocab::Vocabulary;
pub use wav2vec2::Wav2Vec2Ctc;

/// Speech-to-text model.
///
/// Contract: accepts at most the configured ASR window of audio per
/// call; output is Arabic text which may carry diacritics and may
/// hallucinate near the boundaries of underfull input.
pub trait AsrEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &str;

    /// Transcribe one chunk of mono audio
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Acoustic model used for CTC forced alignment.
pub trait AlignmentEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &str;

    /// Sample rate the model expects; callers resample when different
    fn native_sample_rate(&self) -> u32;

    /// Per-frame log-probabilities over the character vocabulary,
    /// shape `[frames, vocab]`
    fn emit_logprobs(&self, samples: &[f32], sample_rate: u32) -> Result<Array2<f32>>;

    /// The character vocabulary, including blank and word-boundary ids
    fn vocab(&self) -> &Vocabulary;
}
