//! ONNX CTC acoustic engine
//!
//! Runs a wav2vec2-style CTC model exported to ONNX (input
//! `input_values` [1, N], output `logits` [1, frames, vocab]). The same
//! session serves greedy transcription and forced alignment.

use crate::audio::processor::resample;
use crate::error::{AppError, Result};
use crate::inference::vocab::Vocabulary;
use crate::inference::{AlignmentEngine, AsrEngine};
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

/// Sample rate wav2vec2 models are trained on
const MODEL_SAMPLE_RATE: u32 = 16_000;

pub struct Wav2Vec2Ctc {
    session: Mutex<Session>,
    vocab: Vocabulary,
}

impl Wav2Vec2Ctc {
    /// Load `model.onnx` plus `vocab.json` (or `vocab.txt`) from a directory.
    pub fn load(model_dir: &Path) -> Result<Self> {
        info!("Loading CTC acoustic model from {:?}", model_dir);

        // Initialize ONNX Runtime (commit() returns bool in ort 2.0)
        let _ = ort::init().with_name("rattil").commit();

        let vocab_path = if model_dir.join("vocab.json").exists() {
            model_dir.join("vocab.json")
        } else {
            model_dir.join("vocab.txt")
        };
        let vocab = Vocabulary::load(&vocab_path)?;
        info!(
            "Loaded vocabulary with {} tokens from {:?}",
            vocab.vocab_size(),
            vocab_path
        );

        let model_path = model_dir.join("model.onnx");
        let session = Session::builder()
            .map_err(|e| AppError::Inference(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::Inference(format!("Failed to set optimization level: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| AppError::Inference(format!("Failed to load acoustic model: {}", e)))?;
        info!("Acoustic model loaded");

        Ok(Self {
            session: Mutex::new(session),
            vocab,
        })
    }

    fn forward(&self, samples: &[f32]) -> Result<Array2<f32>> {
        let mut session = self.session.lock();

        // input_values: [1, N]
        let input_values = Tensor::from_array(([1usize, samples.len()], samples.to_vec()))
            .map_err(|e| AppError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs!["input_values" => input_values])
            .map_err(|e| AppError::Inference(format!("Acoustic inference failed: {}", e)))?;

        // logits: [1, frames, vocab]
        let (shape, data) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Inference(format!("Failed to extract logits: {}", e)))?;

        if shape.len() != 3 {
            return Err(AppError::Inference(format!(
                "unexpected logits shape {:?}",
                shape
            )));
        }
        let frames = shape[1] as usize;
        let vocab_size = shape[2] as usize;

        let logits = Array2::from_shape_vec((frames, vocab_size), data.to_vec())
            .map_err(|e| AppError::Inference(format!("Failed to reshape logits: {}", e)))?;

        debug!("Emissions: {} frames x {} vocab", frames, vocab_size);
        Ok(log_softmax_rows(logits))
    }
}

impl AlignmentEngine for Wav2Vec2Ctc {
    fn name(&self) -> &str {
        "wav2vec2-ctc"
    }

    fn native_sample_rate(&self) -> u32 {
        MODEL_SAMPLE_RATE
    }

    fn emit_logprobs(&self, samples: &[f32], sample_rate: u32) -> Result<Array2<f32>> {
        if sample_rate == MODEL_SAMPLE_RATE {
            self.forward(samples)
        } else {
            let resampled = resample(samples, sample_rate, MODEL_SAMPLE_RATE)?;
            self.forward(&resampled)
        }
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }
}

impl AsrEngine for Wav2Vec2Ctc {
    fn name(&self) -> &str {
        "wav2vec2-ctc"
    }

    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let logprobs = self.emit_logprobs(samples, sample_rate)?;
        Ok(greedy_decode(&logprobs, &self.vocab))
    }
}

/// Greedy CTC decode: per-frame argmax, collapse repeats, drop blanks,
/// map word boundaries to spaces.
fn greedy_decode(logprobs: &Array2<f32>, vocab: &Vocabulary) -> String {
    let mut prev: Option<usize> = None;
    let mut text = String::new();

    for row in logprobs.rows() {
        let best = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(vocab.blank_id);

        if Some(best) != prev && !vocab.is_special_token(best) {
            if best == vocab.word_delim_id {
                text.push(' ');
            } else {
                text.push_str(vocab.decode_token(best));
            }
        }
        prev = Some(best);
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn log_softmax_rows(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum: f32 = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
        row.mapv_inplace(|v| v - log_sum);
    }
    logits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vocab() -> Vocabulary {
        let dir = std::env::temp_dir().join("rattil_w2v_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vocab.txt");
        std::fs::write(&path, "<pad> 0\n| 1\nق 2\nل 3\nه 4\nو 5\n").unwrap();
        Vocabulary::load_txt(&path).unwrap()
    }

    fn emissions_for_path(path: &[usize], vocab_size: usize) -> Array2<f32> {
        let mut logits = Array2::from_elem((path.len(), vocab_size), -10.0f32);
        for (t, &id) in path.iter().enumerate() {
            logits[(t, id)] = 10.0;
        }
        log_softmax_rows(logits)
    }

    #[test]
    fn test_log_softmax_rows_normalize() {
        let logits = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let logprobs = log_softmax_rows(logits);
        for row in logprobs.rows() {
            let total: f32 = row.iter().map(|&v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_greedy_decode_collapses_repeats_and_blanks() {
        let vocab = test_vocab();
        // q q <pad> l <pad> | | h w -> "قل هو"
        let path = [2, 2, 0, 3, 0, 1, 1, 4, 5];
        let logprobs = emissions_for_path(&path, vocab.vocab_size());
        assert_eq!(greedy_decode(&logprobs, &vocab), "قل هو");
    }

    #[test]
    fn test_greedy_decode_repeated_letter_needs_blank() {
        let vocab = test_vocab();
        // l <pad> l decodes as two l's, plain l l collapses to one
        let with_blank = emissions_for_path(&[3, 0, 3], vocab.vocab_size());
        assert_eq!(greedy_decode(&with_blank, &vocab), "لل");
        let without = emissions_for_path(&[3, 3], vocab.vocab_size());
        assert_eq!(greedy_decode(&without, &vocab), "ل");
    }
}
