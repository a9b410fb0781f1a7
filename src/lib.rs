//! Verse-level segmentation of Quran recitation recordings.
//!
//! One audio file in; per-verse canonical text, timing and audio clips
//! out. The work happens in an eleven-stage pipeline: silence chunking,
//! ASR with over-long-chunk fallbacks, transcript dedup, consecutive
//! verse matching against the corpus, CTC forced alignment, boundary
//! normalization and archive emission.

pub mod audio;
pub mod config;
pub mod corpus;
pub mod error;
pub mod inference;
pub mod job;
pub mod pipeline;
pub mod text;

pub use config::{AlignmentMethod, LongChunkApproach, PipelineConfig};
pub use error::{AppError, Result, StageError};
pub use job::{CancelToken, JobFailure, JobSuccess};
pub use pipeline::{Context, Orchestrator, PipelineHandles};

/// Run the full pipeline for one job and fold the outcome into the
/// records the enclosing worker persists.
pub fn process_recording(
    ctx: &mut Context,
    cancel: &CancelToken,
) -> std::result::Result<JobSuccess, JobFailure> {
    match Orchestrator::standard().run(ctx, cancel) {
        Ok(()) => Ok(JobSuccess {
            archive_path: ctx.archive_path.clone().unwrap_or_default(),
            metadata_json: ctx.metadata_json.clone().unwrap_or_default(),
            transcription: ctx.raw_transcription.clone(),
        }),
        Err(e) => Err(JobFailure {
            failure_stage: e.stage.to_string(),
            failure_kind: e.source.kind().to_string(),
            message: e.to_string(),
        }),
    }
}
