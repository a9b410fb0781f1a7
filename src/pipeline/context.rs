//! Pipeline context and the records that flow through it
//!
//! The context is created at job start, populated monotonically by each
//! stage, and read out by the worker once emission completes.

use crate::audio::AudioBuffer;
use crate::config::{AlignmentMethod, PipelineConfig};
use crate::corpus::{QuranCorpus, Verse, VerseRef};
use crate::error::{AppError, Result};
use crate::inference::{AlignmentEngine, AsrEngine};
use crate::job::DebugRecorder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// A contiguous slice of the source audio
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Dense 0-based index, stable across stages
    pub chunk_index: usize,
    pub start_s: f64,
    pub end_s: f64,
    /// Raw ASR output with diacritics
    #[serde(default)]
    pub text: String,
    /// Diacritics stripped, folds applied, whitespace collapsed
    #[serde(default)]
    pub text_normalized: String,
    #[serde(default)]
    pub word_count: usize,
    /// Normalized words removed from the front by Dedup
    #[serde(default)]
    pub omitted_prefix: String,
    /// The same words in their raw form
    #[serde(default)]
    pub omitted_prefix_raw: String,
    /// Whether transcription needed an over-long-chunk partition
    #[serde(default)]
    pub was_split: bool,
}

impl Chunk {
    pub fn at(chunk_index: usize, start_s: f64, end_s: f64) -> Self {
        Self {
            chunk_index,
            start_s,
            end_s,
            text: String::new(),
            text_normalized: String::new(),
            word_count: 0,
            omitted_prefix: String::new(),
            omitted_prefix_raw: String::new(),
            was_split: false,
        }
    }

    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// One aligned word, in the source audio's timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordAlignment {
    pub word: String,
    pub start_s: f64,
    pub end_s: f64,
    /// In [0, 1]
    pub confidence: f64,
}

/// One (chunk, verse) pairing produced by VerseMatch Phase B.
///
/// Reused entries reference a chunk already credited to another verse
/// (multi-verse-in-one-chunk) and carry zero-duration timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAssignment {
    pub chunk_index: usize,
    pub start_s: f64,
    pub end_s: f64,
    pub verse: VerseRef,
    /// 1.0 for exact word-count matches, else the fallback similarity
    pub confidence: f64,
    pub chunk_reuse: bool,
    #[serde(default)]
    pub word_alignments: Vec<WordAlignment>,
    /// Alignments for the omitted dedup prefix, kept for diagnostics
    #[serde(default)]
    pub omitted_alignments: Vec<WordAlignment>,
    #[serde(default)]
    pub alignment_method: Option<AlignmentMethod>,
    /// True when alignment fell through to equal division
    #[serde(default)]
    pub alignment_degraded: bool,
}

/// Verse-level timing produced by VerseTiming and refined by SilenceSplit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerseSlice {
    pub verse: Verse,
    pub chunk_indices: Vec<usize>,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub normalized_start_s: f64,
    pub normalized_end_s: f64,
    pub prev_gap_s: f64,
    pub cutoff_uncertain: bool,
    /// Verse composed entirely of reused chunks
    pub zero_duration: bool,
    pub match_confidence: f64,
    /// Window borrowed from the chunk's primary verse, for emission of
    /// zero-duration verses
    pub emit_window: Option<(f64, f64)>,
}

/// VerseMatch Phase A output
#[derive(Debug, Clone)]
pub struct MatchedSpan {
    /// Matched verses in corpus order, Basmalah entry first when detected
    pub verses: Vec<Verse>,
    pub similarity: f64,
    pub basmalah_prepended: bool,
    pub matched_text: String,
    pub query_text: String,
}

/// Handles to the external collaborators, constructed once at startup.
#[derive(Clone)]
pub struct PipelineHandles {
    pub asr: Arc<dyn AsrEngine>,
    pub aligner: Option<Arc<dyn AlignmentEngine>>,
    pub corpus: Arc<QuranCorpus>,
    pub debug_recorder: Option<Arc<dyn DebugRecorder>>,
}

/// The record every stage reads from and writes to.
pub struct Context {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    /// Lower-cased input container label ("mp3", "wav", ...)
    pub source_format: String,
    pub config: PipelineConfig,
    pub handles: PipelineHandles,

    /// 16 kHz mono with trailing silence, set by Resample
    pub audio: Option<AudioBuffer>,
    pub original_sample_rate: Option<u32>,

    pub chunks: Vec<Chunk>,
    /// Pre-Dedup combined raw transcription, kept for diagnostics
    pub raw_transcription: String,
    /// Combined normalized transcript, the VerseMatch query
    pub combined_normalized: String,

    pub matched: Option<MatchedSpan>,
    pub assignments: Vec<ChunkAssignment>,
    pub verse_slices: Vec<VerseSlice>,

    /// Any chunk fell back to equal-division alignment
    pub alignment_degraded: bool,

    pub archive_path: Option<PathBuf>,
    pub metadata_json: Option<String>,
}

impl Context {
    pub fn new(
        input_path: PathBuf,
        output_dir: PathBuf,
        config: PipelineConfig,
        handles: PipelineHandles,
    ) -> Self {
        let source_format = crate::audio::loader::container_label(&input_path);
        Self {
            job_id: Uuid::new_v4().to_string(),
            input_path,
            output_dir,
            source_format,
            config,
            handles,
            audio: None,
            original_sample_rate: None,
            chunks: Vec::new(),
            raw_transcription: String::new(),
            combined_normalized: String::new(),
            matched: None,
            assignments: Vec::new(),
            verse_slices: Vec::new(),
            alignment_degraded: false,
            archive_path: None,
            metadata_json: None,
        }
    }

    /// The resampled audio, present after stage 1.
    pub fn audio(&self) -> Result<&AudioBuffer> {
        self.audio
            .as_ref()
            .ok_or_else(|| AppError::InvalidState("audio not loaded yet".to_string()))
    }

    /// Compact state summary handed to the debug recorder between stages.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "jobId": self.job_id,
            "sourceFormat": self.source_format,
            "audioDurationS": self.audio.as_ref().map(|a| a.duration_s()),
            "numChunks": self.chunks.len(),
            "numAssignments": self.assignments.len(),
            "numVerses": self.verse_slices.len(),
            "matchSimilarity": self.matched.as_ref().map(|m| m.similarity),
            "transcriptionChars": self.combined_normalized.chars().count(),
            "alignmentDegraded": self.alignment_degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        let chunk = Chunk::at(0, 1.5, 4.0);
        assert!((chunk.duration_s() - 2.5).abs() < 1e-9);
        assert!(chunk.text.is_empty());
    }

    #[test]
    fn test_chunk_serializes_camel_case() {
        let chunk = Chunk::at(3, 0.0, 1.0);
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"chunkIndex\":3"));
        assert!(json.contains("\"startS\""));
    }
}
