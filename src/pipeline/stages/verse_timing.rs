//! Stage 9: invert the chunk-to-verse map into verse timings

use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage, VerseSlice};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct VerseTiming;

impl Stage for VerseTiming {
    fn name(&self) -> &'static str {
        "verse_timing"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if ctx.matched.is_none() {
            return Err(AppError::InvalidState("no matched verses".to_string()));
        }
        if ctx.assignments.is_empty() {
            return Err(AppError::InvalidState("no chunk assignments".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let matched = ctx.matched.as_ref().unwrap();

        // Chunk windows of non-reused assignments, for the fallback
        // timing of verses living entirely inside a shared chunk
        let primary_window: HashMap<usize, (f64, f64)> = ctx
            .assignments
            .iter()
            .filter(|a| !a.chunk_reuse)
            .map(|a| (a.chunk_index, (a.start_s, a.end_s)))
            .collect();

        let mut slices = Vec::with_capacity(matched.verses.len());

        for verse in &matched.verses {
            let mut entries: Vec<_> = ctx
                .assignments
                .iter()
                .filter(|a| a.verse == verse.reference)
                .collect();
            if entries.is_empty() {
                warn!("Verse {}: no chunks found", verse.reference);
                continue;
            }
            entries.sort_by_key(|a| a.chunk_index);

            let chunk_indices: Vec<usize> = entries.iter().map(|a| a.chunk_index).collect();
            let timed: Vec<_> = entries.iter().filter(|a| !a.chunk_reuse).collect();

            let slice = if timed.is_empty() {
                // Reused-only verse: zero duration, emission borrows the
                // shared chunk's window
                let emit_window = entries
                    .first()
                    .and_then(|a| primary_window.get(&a.chunk_index))
                    .copied();
                debug!(
                    "Verse {} is chunk-reuse only; borrowing window {:?}",
                    verse.reference, emit_window
                );
                VerseSlice {
                    verse: verse.clone(),
                    chunk_indices,
                    start_s: 0.0,
                    end_s: 0.0,
                    duration_s: 0.0,
                    normalized_start_s: 0.0,
                    normalized_end_s: 0.0,
                    prev_gap_s: 0.0,
                    cutoff_uncertain: false,
                    zero_duration: true,
                    match_confidence: entries[0].confidence,
                    emit_window,
                }
            } else {
                let start_s = timed.first().unwrap().start_s;
                let end_s = timed.last().unwrap().end_s;
                VerseSlice {
                    verse: verse.clone(),
                    chunk_indices,
                    start_s,
                    end_s,
                    duration_s: end_s - start_s,
                    normalized_start_s: start_s,
                    normalized_end_s: end_s,
                    prev_gap_s: 0.0,
                    cutoff_uncertain: false,
                    zero_duration: false,
                    match_confidence: entries[0].confidence,
                    emit_window: None,
                }
            };

            debug!(
                "{}: {} chunk(s), {:.2}s - {:.2}s",
                verse.reference,
                slice.chunk_indices.len(),
                slice.start_s,
                slice.end_s
            );
            slices.push(slice);
        }

        info!("Calculated timings for {} verse(s)", slices.len());
        ctx.verse_slices = slices;
        Ok(())
    }
}
