//! Stage 1: decode, downmix, resample to 16 kHz, pad with silence

use crate::audio::processor::{append_silence, resample, AudioBuffer};
use crate::audio::load_audio_file;
use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage};
use tracing::info;

pub struct Resample;

impl Stage for Resample {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if ctx.input_path.as_os_str().is_empty() {
            return Err(AppError::InvalidState("no input path".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let decoded = load_audio_file(&ctx.input_path)?;

        if decoded.duration_s() < ctx.config.min_input_duration_s {
            return Err(AppError::TooShort(decoded.duration_s()));
        }

        let target_rate = ctx.config.target_sample_rate;
        let mut samples = resample(&decoded.samples, decoded.sample_rate, target_rate)?;

        // Trailing silence gives the last verse a clean right boundary
        append_silence(&mut samples, target_rate, ctx.config.trailing_silence_s);

        info!(
            "Resampled {:.2}s ({}Hz) to {:.2}s at {}Hz incl. {:.1}s padding",
            decoded.duration_s(),
            decoded.sample_rate,
            samples.len() as f64 / target_rate as f64,
            target_rate,
            ctx.config.trailing_silence_s
        );

        ctx.original_sample_rate = Some(decoded.sample_rate);
        ctx.audio = Some(AudioBuffer::new(samples, target_rate));
        Ok(())
    }
}
