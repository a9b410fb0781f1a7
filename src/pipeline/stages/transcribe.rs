//! Stage 4: ASR over each chunk
//!
//! Chunks within the ASR window go through a single inference call.
//! Over-long chunks are partitioned (silence passes, then sliding
//! windows or speedup); sliding-window transcripts are spliced at their
//! longest common substring to cut boundary hallucinations.

use crate::audio::chunker::{split_over_long_chunk, LongChunkSplit};
use crate::config::PipelineConfig;
use crate::error::{AppError, Result};
use crate::inference::AsrEngine;
use crate::pipeline::{Context, Stage};
use crate::text::{longest_common_substring, normalize_arabic, word_count, word_similarity};
use std::ops::Range;
use tracing::{info, warn};

pub struct Transcribe;

impl Stage for Transcribe {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        ctx.audio()?;
        if ctx.chunks.is_empty() {
            return Err(AppError::InvalidState("no chunks to transcribe".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let audio = ctx.audio()?.clone();
        let asr = ctx.handles.asr.clone();
        let config = ctx.config.clone();
        let max_window_s = config.max_asr_window_s;

        info!(
            "Transcribing {} chunk(s) with {}",
            ctx.chunks.len(),
            asr.name()
        );

        for chunk in &mut ctx.chunks {
            let samples = audio.slice_seconds(chunk.start_s, chunk.end_s);

            let text = if chunk.duration_s() <= max_window_s {
                asr.transcribe(samples, audio.sample_rate)?
            } else {
                warn!(
                    "Chunk {} is {:.2}s, over the {:.1}s window; splitting",
                    chunk.chunk_index,
                    chunk.duration_s(),
                    max_window_s
                );
                chunk.was_split = true;
                transcribe_long_chunk(
                    asr.as_ref(),
                    samples,
                    audio.sample_rate,
                    chunk.chunk_index,
                    &config,
                )?
            };

            chunk.text = text.trim().to_string();
            chunk.text_normalized = normalize_arabic(&chunk.text);
            chunk.word_count = word_count(&chunk.text_normalized);

            info!(
                "Chunk {}: {} word(s)",
                chunk.chunk_index, chunk.word_count
            );
        }

        // Preserved before Dedup touches the chunk texts
        ctx.raw_transcription = ctx
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(())
    }
}

fn transcribe_long_chunk(
    asr: &dyn AsrEngine,
    samples: &[f32],
    sample_rate: u32,
    chunk_index: usize,
    config: &PipelineConfig,
) -> Result<String> {
    let max_samples = config.max_asr_window_samples();
    let duration = samples.len() as f64 / sample_rate as f64;

    let over_long = |ranges: &[Range<usize>]| {
        ranges.iter().any(|r| r.len() > max_samples)
    };

    match split_over_long_chunk(samples, sample_rate, config)? {
        LongChunkSplit::SilenceRanges(ranges) => {
            if over_long(&ranges) {
                return Err(AppError::OverLongChunk {
                    index: chunk_index,
                    duration,
                });
            }
            let texts = transcribe_ranges(asr, samples, sample_rate, &ranges)?;
            Ok(texts.join(" ").trim().to_string())
        }
        LongChunkSplit::SlidingWindows(windows) => {
            if over_long(&windows) {
                return Err(AppError::OverLongChunk {
                    index: chunk_index,
                    duration,
                });
            }
            let texts = transcribe_ranges(asr, samples, sample_rate, &windows)?;
            let mut combined = texts.first().cloned().unwrap_or_default();
            for text in texts.iter().skip(1) {
                combined = splice_transcripts(&combined, text, config);
            }
            Ok(combined.trim().to_string())
        }
        LongChunkSplit::SpedUp { samples: compressed, factor } => {
            if compressed.len() > max_samples + sample_rate as usize {
                return Err(AppError::OverLongChunk {
                    index: chunk_index,
                    duration,
                });
            }
            info!(
                "Chunk {}: transcribing {:.2}x sped-up audio",
                chunk_index, factor
            );
            asr.transcribe(&compressed, sample_rate)
        }
    }
}

fn transcribe_ranges(
    asr: &dyn AsrEngine,
    samples: &[f32],
    sample_rate: u32,
    ranges: &[Range<usize>],
) -> Result<Vec<String>> {
    let mut texts = Vec::with_capacity(ranges.len());
    for (i, range) in ranges.iter().enumerate() {
        info!(
            "Transcribing sub-chunk {}/{} ({:.2}s)",
            i + 1,
            ranges.len(),
            range.len() as f64 / sample_rate as f64
        );
        texts.push(asr.transcribe(&samples[range.clone()], sample_rate)?);
    }
    Ok(texts)
}

/// Reconcile two overlapping window transcripts.
///
/// The longest common substring (over the minimum length) becomes the
/// splice point: everything of `text1` up to and including the match is
/// kept, plus everything of `text2` after it. Falls back to boundary
/// word-overlap detection, then to plain concatenation.
fn splice_transcripts(text1: &str, text2: &str, config: &PipelineConfig) -> String {
    let words1: Vec<&str> = text1.split_whitespace().collect();
    let words2: Vec<&str> = text2.split_whitespace().collect();

    if words1.is_empty() || words2.is_empty() {
        return format!("{} {}", text1.trim(), text2.trim())
            .trim()
            .to_string();
    }

    let str1 = words1.join(" ");
    let str2 = words2.join(" ");

    if let Some(m) = longest_common_substring(&str1, &str2) {
        if m.len > config.splice_min_match_chars {
            let keep1: String = str1.chars().take(m.start_a + m.len).collect();
            let keep2: String = str2.chars().skip(m.start_b + m.len).collect();
            let keep2 = keep2.trim();

            info!(
                "Spliced window transcripts at a {}-char shared sequence",
                m.len
            );

            return if keep2.is_empty() {
                keep1.trim().to_string()
            } else {
                format!("{} {}", keep1.trim(), keep2)
            };
        }
    }

    // Fallback: look for an overlap of 3..=30 words at the boundary
    warn!("No long shared sequence; checking boundary word overlap");
    let max_check = words1.len().min(words2.len()).min(30);
    for overlap in (3..=max_check).rev() {
        let tail = &words1[words1.len() - overlap..];
        let head = &words2[..overlap];
        let similarity = word_similarity(tail, head);
        if similarity >= config.splice_overlap_similarity {
            info!(
                "Found {}-word boundary overlap ({:.0}% similar)",
                overlap,
                similarity * 100.0
            );
            let rest = words2[overlap..].join(" ");
            return if rest.is_empty() {
                str1
            } else {
                format!("{} {}", str1, rest)
            };
        }
    }

    warn!("No overlap found between window transcripts; concatenating");
    format!("{} {}", str1, str2)
}
