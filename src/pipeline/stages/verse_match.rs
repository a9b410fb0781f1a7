//! Stage 7: match the transcript against the corpus and assign chunks
//!
//! Phase A finds the best consecutive-verse span for the combined
//! transcript (with standalone-Basmalah detection). Phase B walks the
//! matched verses left to right, consuming chunks under the ±1
//! word-count tolerance with two fallbacks: fuzzy chunk combinations
//! and multiple short verses inside a single chunk.

use crate::config::PipelineConfig;
use crate::corpus::search::search_consecutive;
use crate::corpus::Verse;
use crate::error::{AppError, Result};
use crate::pipeline::{Chunk, ChunkAssignment, Context, MatchedSpan, Stage};
use crate::text::{is_basmalah, similarity_ratio};
use tracing::{debug, info, warn};

pub struct VerseMatch;

impl Stage for VerseMatch {
    fn name(&self) -> &'static str {
        "verse_match"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if ctx.chunks.is_empty() {
            return Err(AppError::InvalidState("no cleaned chunks".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let query = ctx.combined_normalized.trim().to_string();
        if query.is_empty() {
            return Err(AppError::NoMatch { best_score: 0.0 });
        }

        info!("Matching verses for {}-char transcription", query.chars().count());

        // A recording may open with a standalone Basmalah that is not
        // part of the first verse; search on the remainder.
        let words: Vec<&str> = query.split_whitespace().collect();
        let basmalah_detected = words.len() >= 4
            && is_basmalah(&words[..4].join(" "), ctx.config.basmalah_similarity);
        let search_text = if basmalah_detected {
            info!("Standalone Basmalah detected at the start of the recording");
            words[4..].join(" ")
        } else {
            query.clone()
        };

        let (span, best_score) = search_consecutive(&ctx.handles.corpus, &search_text);
        let span = match span {
            Some(span) if span.similarity >= ctx.config.match_threshold => span,
            _ => return Err(AppError::NoMatch { best_score }),
        };

        let mut verses = span.verses.clone();
        let mut basmalah_prepended = false;
        if basmalah_detected {
            let surah = verses[0].reference.surah;
            if surah == 1 {
                // In Al-Fatiha the Basmalah is verse 1:1 itself
                if verses[0].reference.ayah != 1 {
                    if let Some(opening) = ctx.handles.corpus.verse(1, 1) {
                        verses.insert(0, opening.clone());
                    }
                }
            } else {
                verses.insert(0, ctx.handles.corpus.basmalah_verse(surah));
                basmalah_prepended = true;
            }
        }

        info!(
            "Matched {} verse(s) {}..={} with similarity {:.3}",
            verses.len(),
            verses.first().map(|v| v.reference.to_string()).unwrap_or_default(),
            verses.last().map(|v| v.reference.to_string()).unwrap_or_default(),
            span.similarity
        );

        ctx.assignments = assign_chunks_to_verses(&verses, &ctx.chunks, &ctx.config)?;
        ctx.matched = Some(MatchedSpan {
            verses,
            similarity: span.similarity,
            basmalah_prepended,
            matched_text: span.matched_text,
            query_text: query,
        });

        info!("Mapped {} chunk-verse pair(s)", ctx.assignments.len());
        Ok(())
    }
}

/// Phase B: left-to-right walk over verses and chunks.
fn assign_chunks_to_verses(
    verses: &[Verse],
    chunks: &[Chunk],
    config: &PipelineConfig,
) -> Result<Vec<ChunkAssignment>> {
    let mut assignments = Vec::new();
    let mut chunk_cursor = 0usize;
    let mut verse_idx = 0usize;

    while verse_idx < verses.len() {
        let verse = &verses[verse_idx];
        let target = verse.word_count;
        debug!("Assigning chunks to {} ({} words)", verse.reference, target);

        // Greedy word-count accumulation under the +1 cap
        let mut used: Vec<usize> = Vec::new();
        let mut total_words = 0usize;
        while chunk_cursor < chunks.len() {
            let chunk_words = chunks[chunk_cursor].word_count;
            let would_be = (total_words + chunk_words) as i64 - target as i64;

            if would_be > 1 {
                // A verse needs at least one chunk, even an oversized one
                if used.is_empty() {
                    used.push(chunk_cursor);
                    total_words = chunk_words;
                    chunk_cursor += 1;
                }
                break;
            }

            used.push(chunk_cursor);
            total_words += chunk_words;
            chunk_cursor += 1;
            if (target as i64 - total_words as i64).abs() <= 1 {
                break;
            }
        }

        let diff = total_words as i64 - target as i64;
        let mut confidence = 1.0f64;

        if diff.abs() > 1 {
            warn!(
                "Word count mismatch for {}: {} vs {} (diff {:+})",
                verse.reference, total_words, target, diff
            );
            let start = chunk_cursor - used.len();

            if let Some(combo) = find_best_chunk_combo(verse, chunks, start, config) {
                info!(
                    "Fuzzy combination matched {}: {} chunk(s), similarity {:.2}",
                    verse.reference,
                    combo.end_index - start,
                    combo.similarity
                );
                used = (start..combo.end_index).collect();
                total_words = combo.total_words;
                chunk_cursor = combo.end_index;
                confidence = combo.similarity;
            } else if let Some(multi) =
                try_multi_verse_chunk(verse_idx, verses, &used, chunks, config)
            {
                info!(
                    "Multi-verse chunk: {} verse(s) share chunk {}",
                    multi.verses_consumed, chunks[start].chunk_index
                );
                assignments.extend(multi.entries);
                chunk_cursor = start + 1;
                verse_idx += multi.verses_consumed;
                continue;
            } else {
                return Err(AppError::UnassignableVerse {
                    verse: verse.reference,
                    observed_words: total_words,
                    expected_words: target,
                });
            }
        }

        if used.is_empty() {
            // Every chunk was consumed by earlier verses
            return Err(AppError::UnassignableVerse {
                verse: verse.reference,
                observed_words: 0,
                expected_words: target,
            });
        }

        for &idx in &used {
            let chunk = &chunks[idx];
            assignments.push(ChunkAssignment {
                chunk_index: chunk.chunk_index,
                start_s: chunk.start_s,
                end_s: chunk.end_s,
                verse: verse.reference,
                confidence,
                chunk_reuse: false,
                word_alignments: Vec::new(),
                omitted_alignments: Vec::new(),
                alignment_method: None,
                alignment_degraded: false,
            });
        }

        info!(
            "{}: {} chunk(s), {} word(s) vs {} (diff {:+})",
            verse.reference,
            used.len(),
            total_words,
            target,
            total_words as i64 - target as i64
        );
        verse_idx += 1;
    }

    Ok(assignments)
}

struct ChunkCombo {
    end_index: usize,
    total_words: usize,
    similarity: f64,
}

/// Score 1..=5 consecutive chunks against the verse text; accept the
/// best combination over the match threshold, preferring clearly higher
/// similarity and breaking near-ties by word-count difference.
fn find_best_chunk_combo(
    verse: &Verse,
    chunks: &[Chunk],
    start: usize,
    config: &PipelineConfig,
) -> Option<ChunkCombo> {
    let max_take = 5.min(chunks.len().saturating_sub(start));
    let mut best: Option<ChunkCombo> = None;
    let mut best_word_diff = i64::MAX;

    for take in 1..=max_take {
        let combined = chunks[start..start + take]
            .iter()
            .map(|c| c.text_normalized.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let total_words = combined.split_whitespace().count();
        let word_diff = (total_words as i64 - verse.word_count as i64).abs();
        let similarity = similarity_ratio(&verse.text_normalized, &combined);

        if similarity < config.match_threshold {
            continue;
        }

        let better = match &best {
            None => true,
            Some(b) if similarity > b.similarity + 0.05 => true,
            Some(b) => similarity >= b.similarity - 0.02 && word_diff < best_word_diff,
        };

        if better {
            debug!(
                "Combo candidate: {} chunk(s), {} words, similarity {:.2}",
                take, total_words, similarity
            );
            best_word_diff = word_diff;
            best = Some(ChunkCombo {
                end_index: start + take,
                total_words,
                similarity,
            });
        }
    }

    best
}

struct MultiVerseFit {
    entries: Vec<ChunkAssignment>,
    verses_consumed: usize,
}

/// One chunk holding several short verses: greedily fit consecutive
/// verses into the chunk's word budget, then verify the combined text.
/// The first verse keeps the chunk's timing; the rest reuse it with
/// zero duration.
fn try_multi_verse_chunk(
    verse_idx: usize,
    verses: &[Verse],
    used: &[usize],
    chunks: &[Chunk],
    config: &PipelineConfig,
) -> Option<MultiVerseFit> {
    if used.len() != 1 {
        return None;
    }
    let chunk = &chunks[used[0]];
    let chunk_words = chunk.word_count;
    let current = &verses[verse_idx];

    if chunk_words as f64 <= current.word_count as f64 * 1.5 {
        return None;
    }

    let mut fitted: Vec<&Verse> = Vec::new();
    let mut total_words = 0usize;
    for verse in &verses[verse_idx..] {
        if total_words + verse.word_count <= chunk_words + 2 {
            fitted.push(verse);
            total_words += verse.word_count;
        } else {
            break;
        }
    }

    if fitted.len() < 2 {
        return None;
    }

    let combined = fitted
        .iter()
        .map(|v| v.text_normalized.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let similarity = similarity_ratio(&chunk.text_normalized, &combined);

    if similarity < config.multi_verse_similarity {
        warn!(
            "Multi-verse similarity too low: {:.2} for {} verse(s)",
            similarity,
            fitted.len()
        );
        return None;
    }

    let entries = fitted
        .iter()
        .enumerate()
        .map(|(i, verse)| ChunkAssignment {
            chunk_index: chunk.chunk_index,
            start_s: if i == 0 { chunk.start_s } else { 0.0 },
            end_s: if i == 0 { chunk.end_s } else { 0.0 },
            verse: verse.reference,
            confidence: similarity,
            chunk_reuse: i > 0,
            word_alignments: Vec::new(),
            omitted_alignments: Vec::new(),
            alignment_method: None,
            alignment_degraded: false,
        })
        .collect();

    Some(MultiVerseFit {
        entries,
        verses_consumed: fitted.len(),
    })
}
