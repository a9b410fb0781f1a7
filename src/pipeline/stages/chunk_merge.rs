//! Stage 3: chunk re-indexing
//!
//! Reserved for a future merge heuristic over `min_chunk_duration` and
//! `min_silence_gap`; today it only guarantees order and dense indices.

use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage};
use tracing::info;

pub struct ChunkMerge;

impl Stage for ChunkMerge {
    fn name(&self) -> &'static str {
        "chunk_merge"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if ctx.chunks.is_empty() {
            return Err(AppError::InvalidState("no chunks to merge".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        info!(
            "Chunk merge pass over {} chunk(s) (min_duration={:.1}s, min_gap={:.1}s)",
            ctx.chunks.len(),
            ctx.config.min_chunk_duration_s,
            ctx.config.min_silence_gap_s
        );

        ctx.chunks
            .sort_by(|a, b| a.start_s.partial_cmp(&b.start_s).unwrap());
        for (idx, chunk) in ctx.chunks.iter_mut().enumerate() {
            chunk.chunk_index = idx;
        }

        Ok(())
    }
}
