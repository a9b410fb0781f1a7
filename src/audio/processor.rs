use crate::error::{AppError, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{FftFixedInOut, Resampler};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

/// Mono audio with its sample rate. Samples are f32 in [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Slice by time, clipped to the buffer bounds.
    pub fn slice_seconds(&self, start_s: f64, end_s: f64) -> &[f32] {
        let start = ((start_s * self.sample_rate as f64) as usize).min(self.samples.len());
        let end = ((end_s * self.sample_rate as f64) as usize).min(self.samples.len());
        &self.samples[start..end.max(start)]
    }
}

/// Resample audio between arbitrary rates
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }

    info!("Resampling from {}Hz to {}Hz", source_rate, target_rate);

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 1)
            .map_err(|e| AppError::Audio(format!("Failed to create resampler: {}", e)))?;

    let chunk_size = resampler.input_frames_next();
    let mut output = Vec::new();

    for chunk in samples.chunks(chunk_size) {
        let mut input_chunk = chunk.to_vec();

        // Pad last chunk if needed
        if input_chunk.len() < chunk_size {
            input_chunk.resize(chunk_size, 0.0);
        }

        let result = resampler
            .process(&[input_chunk], None)
            .map_err(|e| AppError::Audio(format!("Resampling failed: {}", e)))?;

        if !result.is_empty() {
            output.extend(&result[0]);
        }
    }

    Ok(output)
}

/// Time-compress audio by `factor` (> 1.0 shortens) via resampling.
/// No pitch preservation; callers accept the shift.
pub fn time_compress(samples: &[f32], sample_rate: u32, factor: f64) -> Result<Vec<f32>> {
    if factor <= 1.0 {
        return Ok(samples.to_vec());
    }
    let virtual_rate = (sample_rate as f64 * factor).round() as u32;
    resample(samples, virtual_rate, sample_rate)
}

/// Append `seconds` of digital silence
pub fn append_silence(samples: &mut Vec<f32>, sample_rate: u32, seconds: f64) {
    let pad = (seconds * sample_rate as f64) as usize;
    samples.extend(std::iter::repeat(0.0).take(pad));
}

/// Calculate RMS (Root Mean Square) of audio samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// RMS level in dBFS relative to full scale (1.0). Silence maps to -inf.
pub fn dbfs(samples: &[f32]) -> f64 {
    let rms = calculate_rms(samples) as f64;
    if rms <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write audio samples to a WAV file (mono, 16-bit PCM)
pub fn write_wav(samples: &[f32], sample_rate: u32, path: &Path) -> Result<()> {
    let mut writer = WavWriter::create(path, wav_spec(sample_rate))
        .map_err(|e| AppError::Audio(format!("Failed to create WAV file: {}", e)))?;

    write_wav_samples(&mut writer, samples)?;

    writer
        .finalize()
        .map_err(|e| AppError::Audio(format!("Failed to finalize WAV: {}", e)))?;

    info!(
        "Wrote WAV file: {} ({} samples, {:.2}s)",
        path.display(),
        samples.len(),
        samples.len() as f32 / sample_rate as f32
    );

    Ok(())
}

/// Encode audio samples as an in-memory WAV (mono, 16-bit PCM)
pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, wav_spec(sample_rate))
            .map_err(|e| AppError::Audio(format!("Failed to create WAV encoder: {}", e)))?;
        write_wav_samples(&mut writer, samples)?;
        writer
            .finalize()
            .map_err(|e| AppError::Audio(format!("Failed to finalize WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

fn write_wav_samples<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    samples: &[f32],
) -> Result<()> {
    for &sample in samples {
        // Convert f32 [-1.0, 1.0] to i16
        let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| AppError::Audio(format!("Failed to write sample: {}", e)))?;
    }
    Ok(())
}
