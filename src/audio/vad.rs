//! Silence detection
//!
//! Windowed dBFS scanning over mono audio. Ranges are expressed in
//! milliseconds so thresholds read the same as the configuration.

use crate::audio::processor::dbfs;
use tracing::debug;

/// A half-open range in milliseconds
pub type MsRange = (u64, u64);

fn ms_to_sample(ms: u64, sample_rate: u32) -> usize {
    (ms as u128 * sample_rate as u128 / 1000) as usize
}

/// Total duration of `samples` in whole milliseconds
pub fn duration_ms(samples: &[f32], sample_rate: u32) -> u64 {
    (samples.len() as u128 * 1000 / sample_rate as u128) as u64
}

/// Find silent ranges: every stretch of at least `min_silence_ms` whose
/// windowed level stays below `thresh_dbfs`, scanned every `seek_step_ms`.
pub fn detect_silence(
    samples: &[f32],
    sample_rate: u32,
    min_silence_ms: u32,
    thresh_dbfs: f64,
    seek_step_ms: u32,
) -> Vec<MsRange> {
    let total_ms = duration_ms(samples, sample_rate);
    let min_silence_ms = min_silence_ms as u64;
    let seek_step_ms = seek_step_ms.max(1) as u64;

    if total_ms < min_silence_ms {
        return Vec::new();
    }

    // Positions of every silent window of length min_silence_ms
    let mut silent_starts = Vec::new();
    let mut start_ms = 0u64;
    while start_ms + min_silence_ms <= total_ms {
        let begin = ms_to_sample(start_ms, sample_rate);
        let end = ms_to_sample(start_ms + min_silence_ms, sample_rate).min(samples.len());
        if dbfs(&samples[begin..end]) < thresh_dbfs {
            silent_starts.push(start_ms);
        }
        start_ms += seek_step_ms;
    }

    // Merge overlapping windows into ranges
    let mut ranges = Vec::new();
    let mut iter = silent_starts.into_iter();
    let Some(first) = iter.next() else {
        return ranges;
    };
    let mut range_start = first;
    let mut prev = first;
    for start in iter {
        if start - prev > seek_step_ms {
            ranges.push((range_start, prev + min_silence_ms));
            range_start = start;
        }
        prev = start;
    }
    ranges.push((range_start, (prev + min_silence_ms).min(total_ms)));

    debug!(
        "Silence scan: {} range(s) over {}ms (thresh {:.1}dBFS)",
        ranges.len(),
        total_ms,
        thresh_dbfs
    );

    ranges
}

/// Complement of [`detect_silence`]: the non-silent ranges of the buffer.
pub fn detect_nonsilent(
    samples: &[f32],
    sample_rate: u32,
    min_silence_ms: u32,
    thresh_dbfs: f64,
    seek_step_ms: u32,
) -> Vec<MsRange> {
    let total_ms = duration_ms(samples, sample_rate);
    let silences = detect_silence(samples, sample_rate, min_silence_ms, thresh_dbfs, seek_step_ms);

    if silences.is_empty() {
        if total_ms == 0 {
            return Vec::new();
        }
        return vec![(0, total_ms)];
    }

    let mut ranges = Vec::new();
    let mut cursor = 0u64;
    for &(silence_start, silence_end) in &silences {
        if silence_start > cursor {
            ranges.push((cursor, silence_start));
        }
        cursor = silence_end;
    }
    if cursor < total_ms {
        ranges.push((cursor, total_ms));
    }

    ranges
}
