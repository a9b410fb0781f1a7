//! Stage 8: per-word timestamps via CTC forced alignment
//!
//! Alignment runs over the full pre-Dedup text (omitted prefix
//! included) so boundary words get realistic timings; the omitted
//! portion is then trimmed off into a diagnostic list. Fallback chain:
//! CTC trellis -> energy-peak segmentation -> equal division.

use crate::audio::processor::calculate_rms;
use crate::config::AlignmentMethod;
use crate::error::{AppError, Result};
use crate::inference::AlignmentEngine;
use crate::pipeline::{Context, Stage, WordAlignment};
use ndarray::Array2;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// RMS envelope hop for the energy fallback
const RMS_HOP: usize = 512;
/// RMS envelope window
const RMS_WINDOW: usize = 2048;
/// Energy-peak alignment confidence
const DTW_CONFIDENCE: f64 = 0.6;
/// Equal-division confidence
const EQUAL_CONFIDENCE: f64 = 0.3;

pub struct WordAlign;

impl Stage for WordAlign {
    fn name(&self) -> &'static str {
        "word_align"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        ctx.audio()?;
        if ctx.assignments.is_empty() {
            return Err(AppError::InvalidState("no chunk assignments".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let audio = ctx.audio()?.clone();
        let method = ctx.config.alignment_method;
        let aligner = ctx.handles.aligner.clone();

        // Full pre-Dedup text and omitted word count per chunk
        let chunk_text: HashMap<usize, (String, usize)> = ctx
            .chunks
            .iter()
            .map(|c| {
                let omitted_words = c.omitted_prefix.split_whitespace().count();
                let full = if c.omitted_prefix.is_empty() {
                    c.text_normalized.clone()
                } else {
                    format!("{} {}", c.omitted_prefix, c.text_normalized)
                };
                (c.chunk_index, (full, omitted_words))
            })
            .collect();

        info!(
            "Aligning {} assignment(s) with method {:?}",
            ctx.assignments.len(),
            method
        );

        let mut processed: HashSet<usize> = HashSet::new();
        let mut aligned_count = 0usize;

        for i in 0..ctx.assignments.len() {
            let (chunk_index, reuse, start_s, end_s) = {
                let a = &ctx.assignments[i];
                (a.chunk_index, a.chunk_reuse, a.start_s, a.end_s)
            };

            if reuse {
                debug!("Skipping alignment for reused chunk {}", chunk_index);
                continue;
            }
            if !processed.insert(chunk_index) {
                continue;
            }

            let Some((full_text, omitted_words)) = chunk_text.get(&chunk_index) else {
                warn!("Assignment references unknown chunk {}", chunk_index);
                continue;
            };
            if full_text.is_empty() || end_s <= start_s {
                warn!("Skipping chunk {}: nothing to align", chunk_index);
                continue;
            }

            let samples = audio.slice_seconds(start_s, end_s);
            let words: Vec<String> = full_text.split_whitespace().map(str::to_string).collect();

            let (alignments, used_method, degraded) = align_chunk(
                method,
                aligner.as_deref(),
                samples,
                audio.sample_rate,
                full_text,
                start_s,
                &words,
            );

            if degraded {
                ctx.alignment_degraded = true;
            }

            let assignment = &mut ctx.assignments[i];
            assignment.omitted_alignments = alignments[..*omitted_words].to_vec();
            assignment.word_alignments = alignments[*omitted_words..].to_vec();
            assignment.alignment_method = Some(used_method);
            assignment.alignment_degraded = degraded;
            aligned_count += 1;

            debug!(
                "Chunk {}: {} word(s) aligned ({:.2}s - {:.2}s)",
                chunk_index,
                assignment.word_alignments.len(),
                start_s,
                end_s
            );
        }

        info!("Completed alignment for {} unique chunk(s)", aligned_count);
        Ok(())
    }
}

/// Run the configured method with its fallback chain.
fn align_chunk(
    method: AlignmentMethod,
    aligner: Option<&dyn AlignmentEngine>,
    samples: &[f32],
    sample_rate: u32,
    text: &str,
    chunk_start_s: f64,
    words: &[String],
) -> (Vec<WordAlignment>, AlignmentMethod, bool) {
    let dtw_or_equal = |cause: Option<&AppError>| {
        if let Some(e) = cause {
            warn!("CTC alignment unavailable ({}); trying energy peaks", e);
        }
        match dtw_align(samples, sample_rate, chunk_start_s, words) {
            Ok(alignments) => (alignments, AlignmentMethod::Dtw, false),
            Err(e) => {
                warn!("Energy-peak alignment failed ({}); using equal division", e);
                (
                    equal_division(samples, sample_rate, chunk_start_s, words),
                    AlignmentMethod::Equal,
                    true,
                )
            }
        }
    };

    match method {
        AlignmentMethod::Wav2Vec2 => match aligner {
            Some(engine) => match ctc_align(engine, samples, sample_rate, text, chunk_start_s, words)
            {
                Ok(alignments) => (alignments, AlignmentMethod::Wav2Vec2, false),
                Err(e) => dtw_or_equal(Some(&e)),
            },
            None => dtw_or_equal(Some(&AppError::InvalidState(
                "no alignment engine loaded".to_string(),
            ))),
        },
        AlignmentMethod::Dtw => dtw_or_equal(None),
        AlignmentMethod::Equal => (
            equal_division(samples, sample_rate, chunk_start_s, words),
            AlignmentMethod::Equal,
            false,
        ),
    }
}

/// CTC forced alignment: trellis over the frame/token grid, backtrack
/// the best path, split into words at the vocabulary's boundary marker.
fn ctc_align(
    engine: &dyn AlignmentEngine,
    samples: &[f32],
    sample_rate: u32,
    text: &str,
    chunk_start_s: f64,
    words: &[String],
) -> Result<Vec<WordAlignment>> {
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let emission = engine.emit_logprobs(samples, sample_rate)?;
    let vocab = engine.vocab();
    let tokens = vocab.tokenize(text);
    if tokens.is_empty() {
        return Err(AppError::Inference("no alignable tokens".to_string()));
    }
    if emission.nrows() <= tokens.len() {
        return Err(AppError::Inference(format!(
            "{} frames cannot carry {} tokens",
            emission.nrows(),
            tokens.len()
        )));
    }

    let trellis = build_trellis(&emission, &tokens, vocab.blank_id);
    let path = backtrack(&trellis, &emission, &tokens, vocab.blank_id)?;

    let duration_s = samples.len() as f64 / sample_rate as f64;
    let ratio = duration_s / emission.nrows() as f64;

    // Group emitted tokens into words at the boundary marker
    let mut spans: Vec<(usize, usize, f64)> = Vec::new();
    let mut frames: Vec<usize> = Vec::new();
    let mut scores: Vec<f64> = Vec::new();
    let mut flush = |frames: &mut Vec<usize>, scores: &mut Vec<f64>, spans: &mut Vec<_>| {
        if !frames.is_empty() {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            spans.push((frames[0], *frames.last().unwrap(), mean));
            frames.clear();
            scores.clear();
        }
    };

    for &(frame, token_idx) in &path {
        let token = tokens[token_idx];
        if token == vocab.word_delim_id {
            flush(&mut frames, &mut scores, &mut spans);
        } else {
            frames.push(frame);
            scores.push(emission[(frame, token)] as f64);
        }
    }
    flush(&mut frames, &mut scores, &mut spans);

    if spans.len() != words.len() {
        return Err(AppError::Inference(format!(
            "aligned {} word span(s) for {} word(s)",
            spans.len(),
            words.len()
        )));
    }

    let alignments = words
        .iter()
        .zip(&spans)
        .map(|(word, &(start_frame, end_frame, mean_logp))| WordAlignment {
            word: word.clone(),
            start_s: chunk_start_s + start_frame as f64 * ratio,
            end_s: (chunk_start_s + (end_frame + 1) as f64 * ratio)
                .min(chunk_start_s + duration_s),
            confidence: mean_logp.exp().clamp(0.0, 1.0),
        })
        .collect();

    Ok(alignments)
}

/// Standard CTC trellis: `T[t+1, j] = max(stay on blank, advance on
/// token j)`, with the first column accumulating blanks and the first
/// row unreachable beyond token zero.
fn build_trellis(emission: &Array2<f32>, tokens: &[usize], blank_id: usize) -> Array2<f64> {
    let num_frames = emission.nrows();
    let num_tokens = tokens.len();
    let mut trellis = Array2::<f64>::zeros((num_frames, num_tokens + 1));

    for t in 1..num_frames {
        trellis[(t, 0)] = trellis[(t - 1, 0)] + emission[(t, blank_id)] as f64;
    }
    for j in 1..=num_tokens {
        trellis[(0, j)] = f64::NEG_INFINITY;
    }

    for t in 0..num_frames - 1 {
        for j in 1..=num_tokens {
            let stay = trellis[(t, j)] + emission[(t, blank_id)] as f64;
            let advance = trellis[(t, j - 1)] + emission[(t, tokens[j - 1])] as f64;
            trellis[(t + 1, j)] = stay.max(advance);
        }
    }

    trellis
}

/// Walk back from the final cell, recording the frame where each token
/// is emitted. Returns ascending (frame, token_index) pairs, one per
/// token.
fn backtrack(
    trellis: &Array2<f64>,
    emission: &Array2<f32>,
    tokens: &[usize],
    blank_id: usize,
) -> Result<Vec<(usize, usize)>> {
    let mut t = trellis.nrows() - 1;
    let mut j = tokens.len();
    let mut path = Vec::with_capacity(tokens.len());

    while j > 0 {
        if t == 0 {
            return Err(AppError::Inference(
                "CTC backtrack exhausted frames before tokens".to_string(),
            ));
        }
        let stayed = trellis[(t - 1, j)] + emission[(t - 1, blank_id)] as f64;
        let changed = trellis[(t - 1, j - 1)] + emission[(t - 1, tokens[j - 1])] as f64;

        t -= 1;
        if changed > stayed {
            j -= 1;
            path.push((t, j));
        }
    }

    path.reverse();
    Ok(path)
}

/// Energy-peak fallback: RMS envelope, peak picking with a 100 ms
/// minimum separation, words distributed proportionally across the
/// peak-anchored segments.
fn dtw_align(
    samples: &[f32],
    sample_rate: u32,
    chunk_start_s: f64,
    words: &[String],
) -> Result<Vec<WordAlignment>> {
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut envelope = Vec::new();
    let mut pos = 0usize;
    while pos < samples.len() {
        let end = (pos + RMS_WINDOW).min(samples.len());
        envelope.push(calculate_rms(&samples[pos..end]));
        pos += RMS_HOP;
    }

    let min_distance = ((0.1 * sample_rate as f64) / RMS_HOP as f64).round() as usize;
    let peaks = find_peaks(&envelope, min_distance.max(1));

    if peaks.len() < words.len().saturating_sub(1) {
        return Err(AppError::Inference(format!(
            "{} energy peak(s) for {} word(s)",
            peaks.len(),
            words.len()
        )));
    }

    let duration_s = samples.len() as f64 / sample_rate as f64;
    let frame_time = RMS_HOP as f64 / sample_rate as f64;

    let mut anchors = vec![0usize];
    anchors.extend_from_slice(&peaks);
    anchors.push(envelope.len());
    anchors.dedup();

    // Word boundary k sits at the proportionally nearest anchor
    let word_n = words.len();
    let last_anchor = anchors.len() - 1;
    let mut boundaries = Vec::with_capacity(word_n + 1);
    for k in 0..=word_n {
        let anchor_idx =
            ((k as f64 / word_n as f64) * last_anchor as f64).round() as usize;
        let time = (anchors[anchor_idx] as f64 * frame_time).min(duration_s);
        boundaries.push(time);
    }
    for k in 1..boundaries.len() {
        if boundaries[k] < boundaries[k - 1] {
            boundaries[k] = boundaries[k - 1];
        }
    }

    Ok(words
        .iter()
        .enumerate()
        .map(|(k, word)| WordAlignment {
            word: word.clone(),
            start_s: chunk_start_s + boundaries[k],
            end_s: chunk_start_s + boundaries[k + 1],
            confidence: DTW_CONFIDENCE,
        })
        .collect())
}

fn find_peaks(envelope: &[f32], min_distance: usize) -> Vec<usize> {
    let mut candidates: Vec<usize> = (1..envelope.len().saturating_sub(1))
        .filter(|&i| envelope[i] > envelope[i - 1] && envelope[i] >= envelope[i + 1])
        .collect();

    // Keep the tallest peak inside every min_distance neighborhood
    candidates.sort_by(|&a, &b| envelope[b].partial_cmp(&envelope[a]).unwrap());
    let mut accepted: Vec<usize> = Vec::new();
    for candidate in candidates {
        if accepted
            .iter()
            .all(|&p| p.abs_diff(candidate) >= min_distance)
        {
            accepted.push(candidate);
        }
    }
    accepted.sort_unstable();
    accepted
}

/// Final fallback: uniform division of the chunk across its words.
fn equal_division(
    samples: &[f32],
    sample_rate: u32,
    chunk_start_s: f64,
    words: &[String],
) -> Vec<WordAlignment> {
    if words.is_empty() {
        return Vec::new();
    }
    let duration_s = samples.len() as f64 / sample_rate as f64;
    let word_duration = duration_s / words.len() as f64;

    words
        .iter()
        .enumerate()
        .map(|(i, word)| WordAlignment {
            word: word.clone(),
            start_s: chunk_start_s + i as f64 * word_duration,
            end_s: chunk_start_s + (i + 1) as f64 * word_duration,
            confidence: EQUAL_CONFIDENCE,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Vocabulary;

    fn test_vocab() -> Vocabulary {
        let dir = std::env::temp_dir().join("rattil_align_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vocab.txt");
        std::fs::write(&path, "<pad> 0\n| 1\nق 2\nل 3\nه 4\nو 5\n").unwrap();
        Vocabulary::load_txt(&path).unwrap()
    }

    fn emissions_for_frames(frame_tokens: &[usize], vocab_size: usize) -> Array2<f32> {
        let mut logits = Array2::from_elem((frame_tokens.len(), vocab_size), -12.0f32);
        for (t, &id) in frame_tokens.iter().enumerate() {
            logits[(t, id)] = 0.0;
        }
        logits
    }

    struct FakeAligner {
        vocab: Vocabulary,
        emission: Array2<f32>,
    }

    impl AlignmentEngine for FakeAligner {
        fn name(&self) -> &str {
            "fake"
        }
        fn native_sample_rate(&self) -> u32 {
            16000
        }
        fn emit_logprobs(&self, _samples: &[f32], _rate: u32) -> Result<Array2<f32>> {
            Ok(self.emission.clone())
        }
        fn vocab(&self) -> &Vocabulary {
            &self.vocab
        }
    }

    #[test]
    fn test_ctc_align_two_words() {
        let vocab = test_vocab();
        // Frame schedule for "قل هو": q q l l | h h w w <pad>
        let schedule = [2, 2, 3, 3, 1, 4, 4, 5, 5, 0];
        let engine = FakeAligner {
            emission: emissions_for_frames(&schedule, vocab.vocab_size()),
            vocab,
        };

        // 10 frames over 1s of audio
        let samples = vec![0.2f32; 16000];
        let words = vec!["قل".to_string(), "هو".to_string()];
        let alignments = ctc_align(&engine, &samples, 16000, "قل هو", 5.0, &words).unwrap();

        assert_eq!(alignments.len(), 2);
        assert_eq!(alignments[0].word, "قل");
        assert_eq!(alignments[1].word, "هو");

        // Inside the chunk, time-ordered, shifted by the chunk start
        assert!(alignments[0].start_s >= 5.0);
        assert!(alignments[0].end_s <= alignments[1].start_s + 1e-9);
        assert!(alignments[1].end_s <= 6.0 + 0.02);
        // First word occupies the early frames, second the late ones
        assert!(alignments[0].start_s < 5.3);
        assert!(alignments[1].start_s > 5.4);
        for a in &alignments {
            assert!(a.confidence > 0.5 && a.confidence <= 1.0);
        }
    }

    #[test]
    fn test_ctc_align_word_count_mismatch_is_error() {
        let vocab = test_vocab();
        let schedule = [2, 3, 0, 0];
        let engine = FakeAligner {
            emission: emissions_for_frames(&schedule, vocab.vocab_size()),
            vocab,
        };
        let samples = vec![0.2f32; 6400];
        // Text says two words, but the tokenizer only sees one ("x" is unknown)
        let words = vec!["قل".to_string(), "x".to_string()];
        let err = ctc_align(&engine, &samples, 16000, "قل x", 0.0, &words).unwrap_err();
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn test_trellis_shape_and_boundaries() {
        let vocab = test_vocab();
        let emission = emissions_for_frames(&[2, 3, 0, 0, 0], vocab.vocab_size());
        let tokens = vec![2usize, 3usize];
        let trellis = build_trellis(&emission, &tokens, vocab.blank_id);

        assert_eq!(trellis.dim(), (5, 3));
        assert_eq!(trellis[(0, 1)], f64::NEG_INFINITY);
        assert_eq!(trellis[(0, 2)], f64::NEG_INFINITY);
        // First column accumulates blank scores
        assert!(trellis[(4, 0)] <= trellis[(3, 0)] + 1e-9);
    }

    #[test]
    fn test_dtw_align_two_bursts() {
        // Two 0.5s bursts separated by 0.5s of silence
        let sr = 16000usize;
        let mut samples = vec![0.4f32; sr / 2];
        samples.extend(vec![0.0f32; sr / 2]);
        samples.extend(vec![0.4f32; sr / 2]);

        let words = vec!["اول".to_string(), "ثاني".to_string()];
        let alignments = dtw_align(&samples, 16000, 0.0, &words).unwrap();

        assert_eq!(alignments.len(), 2);
        assert!(alignments[0].start_s <= alignments[0].end_s);
        assert!(alignments[0].end_s <= alignments[1].start_s + 1e-9);
        assert!((alignments[1].end_s - 1.5).abs() < 0.1);
        assert_eq!(alignments[0].confidence, DTW_CONFIDENCE);
    }

    #[test]
    fn test_dtw_rejects_flat_audio() {
        let samples = vec![0.0f32; 16000];
        let words = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(dtw_align(&samples, 16000, 0.0, &words).is_err());
    }

    #[test]
    fn test_equal_division_covers_chunk() {
        let samples = vec![0.1f32; 32000]; // 2s
        let words: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let alignments = equal_division(&samples, 16000, 10.0, &words);

        assert_eq!(alignments.len(), 4);
        assert_eq!(alignments[0].start_s, 10.0);
        assert!((alignments[3].end_s - 12.0).abs() < 1e-9);
        for pair in alignments.windows(2) {
            assert!((pair[0].end_s - pair[1].start_s).abs() < 1e-9);
        }
        assert_eq!(alignments[0].confidence, EQUAL_CONFIDENCE);
    }
}
