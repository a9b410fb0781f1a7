use thiserror::Error;

use crate::corpus::VerseRef;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Input audio could not be decoded, or decoded to nothing.
    #[error("failed to decode input audio: {0}")]
    Decode(String),

    /// Decoded audio is shorter than the 0.1 s minimum.
    #[error("decoded audio too short: {0:.3}s (minimum 0.1s)")]
    TooShort(f64),

    /// A chunk exceeded the ASR window and every splitting strategy failed.
    #[error("chunk {index} ({duration:.2}s) exceeds the ASR window and could not be split")]
    OverLongChunk { index: usize, duration: f64 },

    /// No consecutive-verse span scored above the acceptance threshold.
    #[error("no verse span matched the transcription (best score {best_score:.2})")]
    NoMatch { best_score: f64 },

    /// Chunk-to-verse assignment exhausted every fallback for one verse.
    #[error(
        "could not assign chunks to verse {verse}: {observed_words} chunk words \
         vs {expected_words} expected (tolerance \u{b1}1)"
    )]
    UnassignableVerse {
        verse: VerseRef,
        observed_words: usize,
        expected_words: usize,
    },

    #[error("audio: {0}")]
    Audio(String),

    #[error("inference: {0}")]
    Inference(String),

    #[error("corpus: {0}")]
    Corpus(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),
}

impl AppError {
    /// Short machine-readable label recorded as `failure_kind` by the worker.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Decode(_) => "decode_error",
            AppError::TooShort(_) => "too_short_error",
            AppError::OverLongChunk { .. } => "over_long_chunk_unrecoverable",
            AppError::NoMatch { .. } => "no_match",
            AppError::UnassignableVerse { .. } => "unassignable_verse",
            AppError::Audio(_) => "audio_error",
            AppError::Inference(_) => "inference_error",
            AppError::Corpus(_) => "corpus_error",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Io(_) => "io_error",
            AppError::Json(_) => "json_error",
            AppError::Archive(_) => "archive_error",
        }
    }
}

/// A pipeline failure with the stage it surfaced from.
#[derive(Debug, Error)]
#[error("stage {stage} failed: {source}")]
pub struct StageError {
    pub stage: &'static str,
    #[source]
    pub source: AppError,
}

impl StageError {
    pub fn new(stage: &'static str, source: AppError) -> Self {
        Self { stage, source }
    }
}
