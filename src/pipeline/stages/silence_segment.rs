//! Stage 2: split the buffer into non-silent chunks with padding

use crate::audio::vad::detect_nonsilent;
use crate::error::Result;
use crate::pipeline::{Chunk, Context, Stage};
use tracing::info;

/// Padded ranges shorter than this are dropped
const MIN_CHUNK_MS: u64 = 100;

pub struct SilenceSegment;

impl Stage for SilenceSegment {
    fn name(&self) -> &'static str {
        "silence_segment"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        ctx.audio().map(|_| ())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let audio = ctx.audio()?;
        let total_ms = (audio.duration_s() * 1000.0) as u64;

        info!(
            "Detecting silence (min_len={}ms, thresh={}dBFS)",
            ctx.config.min_silence_len_ms, ctx.config.silence_thresh_dbfs
        );

        let nonsilent = detect_nonsilent(
            &audio.samples,
            audio.sample_rate,
            ctx.config.min_silence_len_ms,
            ctx.config.silence_thresh_dbfs,
            ctx.config.seek_step_ms,
        );

        let mut chunks = Vec::new();

        if nonsilent.is_empty() {
            // No speech found; keep the whole buffer as a single chunk
            chunks.push(Chunk::at(0, 0.0, audio.duration_s()));
        } else {
            let keep = ctx.config.keep_silence_ms as u64;
            for &(start_ms, end_ms) in &nonsilent {
                let padded_start = start_ms.saturating_sub(keep);
                let padded_end = (end_ms + keep).min(total_ms);

                if padded_end - padded_start < MIN_CHUNK_MS {
                    continue;
                }

                chunks.push(Chunk::at(
                    chunks.len(),
                    padded_start as f64 / 1000.0,
                    padded_end as f64 / 1000.0,
                ));
            }

            if chunks.is_empty() {
                chunks.push(Chunk::at(0, 0.0, audio.duration_s()));
            }
        }

        info!("Detected {} audio chunk(s)", chunks.len());
        ctx.chunks = chunks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{context_with_audio, planted_speech};

    #[test]
    fn test_segments_planted_bursts() {
        // Three bursts separated by 1s silences
        let samples = planted_speech(&[(0.5, 2.0), (3.0, 4.5), (5.5, 7.0)], 8.0);
        let mut ctx = context_with_audio(samples, 16000);

        SilenceSegment.execute(&mut ctx).unwrap();

        assert_eq!(ctx.chunks.len(), 3);
        for (i, chunk) in ctx.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
        // Strictly ordered and non-overlapping
        for pair in ctx.chunks.windows(2) {
            assert!(pair[0].end_s <= pair[1].start_s);
        }
        // Padding extends each burst by up to 200ms on each side
        let first = &ctx.chunks[0];
        assert!(first.start_s >= 0.25 && first.start_s <= 0.5);
        assert!(first.end_s >= 2.0 && first.end_s <= 2.35);
    }

    #[test]
    fn test_silence_only_audio_keeps_full_buffer() {
        let samples = vec![0.0001f32; 16000 * 2];
        let mut ctx = context_with_audio(samples, 16000);

        SilenceSegment.execute(&mut ctx).unwrap();

        assert_eq!(ctx.chunks.len(), 1);
        assert_eq!(ctx.chunks[0].start_s, 0.0);
        assert!((ctx.chunks[0].end_s - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_padding_clipped_to_buffer_bounds() {
        // Speech starts immediately, so left padding must clip at zero
        let samples = planted_speech(&[(0.0, 1.0)], 2.0);
        let mut ctx = context_with_audio(samples, 16000);

        SilenceSegment.execute(&mut ctx).unwrap();

        assert_eq!(ctx.chunks.len(), 1);
        assert_eq!(ctx.chunks[0].start_s, 0.0);
    }
}
