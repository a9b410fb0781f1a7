//! Splitting strategies for chunks that exceed the ASR window
//!
//! Evaluated in order: progressively more sensitive silence passes,
//! then the configured final approach (sliding windows or speedup).

use crate::audio::processor::time_compress;
use crate::audio::vad::detect_nonsilent;
use crate::config::{LongChunkApproach, PipelineConfig};
use crate::error::Result;
use std::ops::Range;
use tracing::{info, warn};

/// How an over-long chunk was partitioned.
#[derive(Debug)]
pub enum LongChunkSplit {
    /// Non-overlapping sub-chunks cut at detected silences
    SilenceRanges(Vec<Range<usize>>),
    /// Overlapping fixed-size windows; transcripts need splicing
    SlidingWindows(Vec<Range<usize>>),
    /// The whole chunk time-compressed to fit a single ASR call
    SpedUp { samples: Vec<f32>, factor: f64 },
}

impl LongChunkSplit {
    pub fn sub_chunk_count(&self) -> usize {
        match self {
            LongChunkSplit::SilenceRanges(r) | LongChunkSplit::SlidingWindows(r) => r.len(),
            LongChunkSplit::SpedUp { .. } => 1,
        }
    }
}

/// Partition an over-long chunk so every piece fits the ASR window.
pub fn split_over_long_chunk(
    samples: &[f32],
    sample_rate: u32,
    config: &PipelineConfig,
) -> Result<LongChunkSplit> {
    let max_samples = config.max_asr_window_samples();
    let duration_s = samples.len() as f64 / sample_rate as f64;

    for (attempt, pass) in config.sub_split_passes.iter().enumerate() {
        info!(
            "Silence sub-split attempt {}/{}: min_silence={}ms, thresh={}dBFS",
            attempt + 1,
            config.sub_split_passes.len(),
            pass.min_silence_ms,
            pass.thresh_dbfs
        );

        let nonsilent = detect_nonsilent(
            samples,
            sample_rate,
            pass.min_silence_ms,
            pass.thresh_dbfs,
            config.seek_step_ms,
        );
        if nonsilent.is_empty() {
            warn!("Attempt {}: no speech detected", attempt + 1);
            continue;
        }

        let ranges = accumulate_ranges(samples.len(), sample_rate, &nonsilent, max_samples);
        let all_valid = ranges.iter().all(|r| r.len() <= max_samples);

        if all_valid && ranges.len() > 1 {
            info!(
                "Attempt {}: split into {} sub-chunks at silences",
                attempt + 1,
                ranges.len()
            );
            return Ok(LongChunkSplit::SilenceRanges(ranges));
        }
        warn!(
            "Attempt {}: invalid partition ({} sub-chunks, all_valid={})",
            attempt + 1,
            ranges.len(),
            all_valid
        );
    }

    match config.long_chunk_approach {
        LongChunkApproach::SlidingWindow => {
            warn!(
                "All silence attempts failed; using sliding windows with {:.0}s overlap",
                config.min_window_overlap_s
            );
            Ok(LongChunkSplit::SlidingWindows(sliding_windows(
                samples.len(),
                max_samples,
                config.min_window_overlap_samples(),
            )))
        }
        LongChunkApproach::Speedup => {
            let factor = duration_s / config.max_asr_window_s;
            warn!(
                "All silence attempts failed; time-compressing {:.2}s by {:.2}x",
                duration_s, factor
            );
            let samples = time_compress(samples, sample_rate, factor)?;
            Ok(LongChunkSplit::SpedUp { samples, factor })
        }
    }
}

/// Accumulate non-silent segments into sub-chunks, flushing at the
/// preceding silence whenever the accumulator would exceed the window.
fn accumulate_ranges(
    total_samples: usize,
    sample_rate: u32,
    nonsilent_ms: &[(u64, u64)],
    max_samples: usize,
) -> Vec<Range<usize>> {
    let to_sample =
        |ms: u64| ((ms as u128 * sample_rate as u128 / 1000) as usize).min(total_samples);

    let mut ranges = Vec::new();
    let mut acc_start = 0usize;

    for &(start_ms, end_ms) in nonsilent_ms {
        let start = to_sample(start_ms);
        let end = to_sample(end_ms);

        if end - acc_start > max_samples && start > acc_start {
            ranges.push(acc_start..start);
            acc_start = start;
        }
    }

    if acc_start < total_samples {
        ranges.push(acc_start..total_samples);
    }

    ranges
}

/// Fixed-size windows with at least `min_overlap` shared samples; the
/// last window is left-extended to full size when possible.
fn sliding_windows(
    total_samples: usize,
    max_samples: usize,
    min_overlap: usize,
) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + max_samples).min(total_samples);
        windows.push(start..end);

        let remaining = total_samples - end;
        if remaining == 0 {
            break;
        }
        if remaining <= min_overlap {
            // Left-extend the final window so it still spans a full ASR call
            start = total_samples.saturating_sub(max_samples);
        } else {
            start = end - min_overlap;
        }
    }

    info!("Created {} overlapping windows", windows.len());
    windows
}
