//! Stage 6: join cleaned chunk texts into the match query

use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage};
use tracing::info;

pub struct Combine;

impl Stage for Combine {
    fn name(&self) -> &'static str {
        "combine"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if ctx.chunks.is_empty() {
            return Err(AppError::InvalidState("no transcriptions".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        ctx.combined_normalized = ctx
            .chunks
            .iter()
            .map(|c| c.text_normalized.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        info!(
            "Combined transcription: {} chars, {} words",
            ctx.combined_normalized.chars().count(),
            ctx.combined_normalized.split_whitespace().count()
        );
        Ok(())
    }
}
