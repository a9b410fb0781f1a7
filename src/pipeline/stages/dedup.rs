//! Stage 5: remove boundary overlap between consecutive chunk transcripts
//!
//! Silence padding makes neighboring chunks hear each other's edge
//! words; the ASR then emits them twice. The largest matching
//! suffix/prefix word overlap is removed from the later chunk and
//! stored so WordAlign can still time those words.

use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage};
use crate::text::{word_count, word_similarity, CLOSING_FORMULA};
use tracing::{debug, info};

pub struct Dedup;

impl Stage for Dedup {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if ctx.chunks.is_empty() {
            return Err(AppError::InvalidState("no transcriptions".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let threshold = ctx.config.dedup_similarity;
        let mut removed_from = 0usize;

        for i in 1..ctx.chunks.len() {
            let previous = ctx.chunks[i - 1].text_normalized.clone();
            let current = ctx.chunks[i].text_normalized.clone();
            if previous.is_empty() || current.is_empty() {
                continue;
            }

            let prev_words: Vec<&str> = previous.split_whitespace().collect();
            let curr_words: Vec<&str> = current.split_whitespace().collect();

            let overlap = find_boundary_overlap(&prev_words, &curr_words, threshold);
            if overlap == 0 {
                continue;
            }
            removed_from += 1;

            let chunk = &mut ctx.chunks[i];
            chunk.omitted_prefix = curr_words[..overlap].join(" ");
            chunk.text_normalized = curr_words[overlap..].join(" ");
            chunk.word_count = word_count(&chunk.text_normalized);

            // Drop the same number of words from the raw text
            let raw_words: Vec<&str> = chunk.text.split_whitespace().collect();
            if raw_words.len() >= overlap {
                chunk.omitted_prefix_raw = raw_words[..overlap].join(" ");
                chunk.text = raw_words[overlap..].join(" ");
            }

            debug!(
                "Chunk {}: removed {} duplicate word(s): '{}'",
                chunk.chunk_index, overlap, chunk.omitted_prefix
            );
        }

        // A recording often ends on the closing formula; it matches no verse
        if let Some(last) = ctx.chunks.last() {
            if last.text_normalized.trim() == CLOSING_FORMULA {
                info!("Dropping closing-formula chunk {}", last.chunk_index);
                ctx.chunks.pop();
            }
        }

        info!(
            "Dedup complete: overlap removed from {} of {} chunk(s)",
            removed_from,
            ctx.chunks.len()
        );
        Ok(())
    }
}

/// Largest `n` so the last `n` words of `prev` match the first `n` of
/// `curr`, exactly or above the similarity threshold. Longest exact
/// match wins ties.
fn find_boundary_overlap(prev: &[&str], curr: &[&str], threshold: f64) -> usize {
    let max_overlap = prev.len().min(curr.len());
    let mut best_overlap = 0usize;
    let mut best_similarity = 0.0f64;

    for overlap in (1..=max_overlap).rev() {
        let tail = &prev[prev.len() - overlap..];
        let head = &curr[..overlap];

        if tail == head {
            return overlap;
        }

        let similarity = word_similarity(tail, head);
        if similarity >= threshold && similarity > best_similarity {
            best_overlap = overlap;
            best_similarity = similarity;
        }
    }

    best_overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{chunk_with_text, context_with_audio};

    #[test]
    fn test_exact_overlap_removed() {
        let mut ctx = context_with_audio(vec![0.0; 16000], 16000);
        ctx.chunks = vec![
            chunk_with_text(0, 0.0, 2.0, "قل هو الله احد"),
            chunk_with_text(1, 2.0, 4.0, "الله احد الله الصمد"),
        ];

        Dedup.execute(&mut ctx).unwrap();

        assert_eq!(ctx.chunks[1].text_normalized, "الله الصمد");
        assert_eq!(ctx.chunks[1].omitted_prefix, "الله احد");
        assert_eq!(ctx.chunks[1].word_count, 2);
        // The first chunk is untouched
        assert_eq!(ctx.chunks[0].text_normalized, "قل هو الله احد");
    }

    #[test]
    fn test_no_overlap_is_untouched() {
        let mut ctx = context_with_audio(vec![0.0; 16000], 16000);
        ctx.chunks = vec![
            chunk_with_text(0, 0.0, 2.0, "قل هو الله احد"),
            chunk_with_text(1, 2.0, 4.0, "لم يلد ولم يولد"),
        ];

        Dedup.execute(&mut ctx).unwrap();

        assert_eq!(ctx.chunks[1].text_normalized, "لم يلد ولم يولد");
        assert!(ctx.chunks[1].omitted_prefix.is_empty());
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let mut ctx = context_with_audio(vec![0.0; 16000], 16000);
        ctx.chunks = vec![
            chunk_with_text(0, 0.0, 2.0, "قل هو الله احد"),
            chunk_with_text(1, 2.0, 4.0, "احد الله الصمد"),
        ];

        Dedup.execute(&mut ctx).unwrap();
        let after_first: Vec<String> =
            ctx.chunks.iter().map(|c| c.text_normalized.clone()).collect();

        Dedup.execute(&mut ctx).unwrap();
        let after_second: Vec<String> =
            ctx.chunks.iter().map(|c| c.text_normalized.clone()).collect();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_closing_formula_chunk_dropped() {
        let mut ctx = context_with_audio(vec![0.0; 16000], 16000);
        ctx.chunks = vec![
            chunk_with_text(0, 0.0, 2.0, "قل هو الله احد"),
            chunk_with_text(1, 2.0, 4.0, "صدق الله العظيم"),
        ];

        Dedup.execute(&mut ctx).unwrap();

        assert_eq!(ctx.chunks.len(), 1);
        assert_eq!(ctx.chunks[0].chunk_index, 0);
    }
}
