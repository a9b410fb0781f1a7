//! Pipeline orchestration
//!
//! The pipeline is an ordered list of stages, each mutating the shared
//! [`Context`]. Stage boundaries are hard barriers: a stage sees the
//! fully populated output of every stage before it. A failure is
//! terminal for the job; the partial context survives for diagnostics.

pub mod context;
pub mod stages;

pub use context::{
    Chunk, ChunkAssignment, Context, MatchedSpan, PipelineHandles, VerseSlice, WordAlignment,
};

use crate::error::{AppError, Result, StageError};
use crate::job::CancelToken;
use tracing::{info, warn};

/// One pipeline stage.
pub trait Stage: Send + Sync {
    /// Stable stage name, attached to errors and debug records
    fn name(&self) -> &'static str;

    /// Check the context carries everything this stage needs
    fn validate(&self, ctx: &Context) -> Result<()>;

    /// Run the stage, extending the context in place
    fn execute(&self, ctx: &mut Context) -> Result<()>;
}

/// Runs stages in order with cancellation checks, progress accounting
/// and debug recording between stages.
pub struct Orchestrator {
    stages: Vec<(Box<dyn Stage>, u32)>,
}

impl Orchestrator {
    /// The standard eleven-stage pipeline, with relative progress shares.
    pub fn standard() -> Self {
        let stages: Vec<(Box<dyn Stage>, u32)> = vec![
            (Box::new(stages::resample::Resample), 3),
            (Box::new(stages::silence_segment::SilenceSegment), 5),
            (Box::new(stages::chunk_merge::ChunkMerge), 2),
            (Box::new(stages::transcribe::Transcribe), 20),
            (Box::new(stages::dedup::Dedup), 8),
            (Box::new(stages::combine::Combine), 2),
            (Box::new(stages::verse_match::VerseMatch), 20),
            (Box::new(stages::word_align::WordAlign), 20),
            (Box::new(stages::verse_timing::VerseTiming), 5),
            (Box::new(stages::silence_split::SilenceSplit), 10),
            (Box::new(stages::emit::Emit), 5),
        ];
        Self { stages }
    }

    /// Drive the whole pipeline over `ctx`.
    ///
    /// Cancellation is honored between stages only; an in-flight stage
    /// always runs to completion.
    pub fn run(&self, ctx: &mut Context, cancel: &CancelToken) -> std::result::Result<(), StageError> {
        let total_weight: u32 = self.stages.iter().map(|(_, w)| w).sum();
        let mut done_weight = 0u32;

        for (stage, weight) in &self.stages {
            if cancel.is_cancelled() {
                warn!("Job {} cancelled before stage {}", ctx.job_id, stage.name());
                return Err(StageError::new(
                    stage.name(),
                    AppError::InvalidState("job cancelled".to_string()),
                ));
            }

            info!(
                "[{}] stage {} starting ({}%)",
                ctx.job_id,
                stage.name(),
                done_weight * 100 / total_weight
            );

            stage
                .validate(ctx)
                .and_then(|_| stage.execute(ctx))
                .map_err(|e| StageError::new(stage.name(), e))?;

            done_weight += weight;
            info!(
                "[{}] stage {} complete ({}%)",
                ctx.job_id,
                stage.name(),
                done_weight * 100 / total_weight
            );

            if let Some(recorder) = &ctx.handles.debug_recorder {
                recorder.record(stage.name(), &ctx.snapshot());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
