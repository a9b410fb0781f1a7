//! Stage 10: normalize verse boundaries by splitting inter-verse gaps
//!
//! Positive gaps are halved between neighbors. Zero gaps trigger a
//! secondary silence search around the shared boundary; when nothing is
//! found both verses are marked uncertain. Overlapping (negative) gaps
//! keep their boundaries and are marked uncertain too.

use crate::audio::vad::detect_silence;
use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage};
use tracing::{info, warn};

/// Gaps within this tolerance count as zero
const ZERO_GAP_EPSILON: f64 = 1e-6;
/// Silence length the secondary search looks for (ms)
const BOUNDARY_SILENCE_MS: u32 = 500;
/// Threshold of the secondary search (dBFS)
const BOUNDARY_THRESH_DBFS: f64 = -40.0;

pub struct SilenceSplit;

impl Stage for SilenceSplit {
    fn name(&self) -> &'static str {
        "silence_split"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        ctx.audio()?;
        if ctx.verse_slices.is_empty() {
            return Err(AppError::InvalidState("no verse timings".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let audio = ctx.audio()?.clone();

        // Zero-duration (reused) verses carry sentinel boundaries and
        // are invisible to the gap walk
        let timed: Vec<usize> = ctx
            .verse_slices
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.zero_duration)
            .map(|(i, _)| i)
            .collect();

        info!(
            "Splitting silences between {} timed verse(s)",
            timed.len()
        );

        for pair in timed.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let gap = ctx.verse_slices[right].start_s - ctx.verse_slices[left].end_s;
            ctx.verse_slices[right].prev_gap_s = gap;

            if gap > ZERO_GAP_EPSILON {
                let half = gap / 2.0;
                ctx.verse_slices[left].normalized_end_s += half;
                ctx.verse_slices[right].normalized_start_s -= half;
            } else if gap.abs() <= ZERO_GAP_EPSILON {
                let boundary = ctx.verse_slices[left].end_s;
                warn!(
                    "Zero gap between {} and {}; searching for silence near {:.2}s",
                    ctx.verse_slices[left].verse.reference,
                    ctx.verse_slices[right].verse.reference,
                    boundary
                );

                match find_silence_near(&audio, boundary, ctx.config.boundary_search_window_s, ctx.config.seek_step_ms) {
                    Some(midpoint) => {
                        info!("Found silence at {:.2}s; moving the boundary", midpoint);
                        ctx.verse_slices[left].normalized_end_s = midpoint;
                        ctx.verse_slices[right].normalized_start_s = midpoint;
                    }
                    None => {
                        warn!("No silence in the search window; boundary is uncertain");
                        ctx.verse_slices[left].cutoff_uncertain = true;
                        ctx.verse_slices[right].cutoff_uncertain = true;
                    }
                }
            } else {
                warn!(
                    "Verses {} and {} overlap by {:.3}s; keeping boundaries",
                    ctx.verse_slices[left].verse.reference,
                    ctx.verse_slices[right].verse.reference,
                    -gap
                );
                ctx.verse_slices[left].cutoff_uncertain = true;
                ctx.verse_slices[right].cutoff_uncertain = true;
            }
        }

        // Outer edges keep their raw boundaries
        if let Some(&first) = timed.first() {
            let slice = &mut ctx.verse_slices[first];
            slice.normalized_start_s = slice.start_s;
        }
        if let Some(&last) = timed.last() {
            let slice = &mut ctx.verse_slices[last];
            slice.normalized_end_s = slice.end_s;
        }

        Ok(())
    }
}

/// Midpoint of the silence closest to `boundary_s` within the search
/// window, if any qualifies.
fn find_silence_near(
    audio: &crate::audio::AudioBuffer,
    boundary_s: f64,
    window_s: f64,
    seek_step_ms: u32,
) -> Option<f64> {
    let search_start = (boundary_s - window_s).max(0.0);
    let search_end = (boundary_s + window_s).min(audio.duration_s());
    let segment = audio.slice_seconds(search_start, search_end);

    let silences = detect_silence(
        segment,
        audio.sample_rate,
        BOUNDARY_SILENCE_MS,
        BOUNDARY_THRESH_DBFS,
        seek_step_ms,
    );

    silences
        .iter()
        .map(|&(start_ms, end_ms)| {
            search_start + (start_ms + end_ms) as f64 / 2.0 / 1000.0
        })
        .min_by(|a, b| {
            (a - boundary_s)
                .abs()
                .partial_cmp(&(b - boundary_s).abs())
                .unwrap()
        })
}
