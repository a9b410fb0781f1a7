//! Consecutive-verse search
//!
//! Sliding-window scan over the flat corpus ordering: from every
//! candidate start, extend verse-by-verse while the concatenated
//! canonical text stays a high-similarity prefix of the query.

use crate::corpus::{QuranCorpus, Verse, VerseRef};
use crate::text::similarity_ratio;
use tracing::{debug, info};

/// Similarity required to keep extending a candidate span by one verse.
const EXTENSION_THRESHOLD: f64 = 0.70;

/// A consecutive run of corpus verses matched against the query.
#[derive(Debug, Clone)]
pub struct VerseSpan {
    pub verses: Vec<Verse>,
    /// Overall similarity of the concatenated span text vs the query
    pub similarity: f64,
    pub start: VerseRef,
    pub end: VerseRef,
    /// The canonical text the span matched
    pub matched_text: String,
}

/// Best-scoring consecutive span for `query` (normalized text), together
/// with the best score seen, which callers compare to their acceptance
/// threshold. `None` when no candidate extends past its first verse
/// test.
pub fn search_consecutive(corpus: &QuranCorpus, query: &str) -> (Option<VerseSpan>, f64) {
    let query = query.trim();
    if query.is_empty() || corpus.is_empty() {
        return (None, 0.0);
    }

    let query_chars: Vec<char> = query.chars().collect();
    let verses = corpus.verses();

    let mut best: Option<VerseSpan> = None;
    let mut best_score = 0.0f64;

    for start_idx in 0..verses.len() {
        let mut concat = String::new();
        let mut end_idx = start_idx;

        // Every extension step is a candidate span of its own; the
        // maximal extension is not necessarily the best-scoring one.
        while end_idx < verses.len() {
            let candidate = if concat.is_empty() {
                verses[end_idx].text_normalized.clone()
            } else {
                format!("{} {}", concat, verses[end_idx].text_normalized)
            };

            // Compare against the query prefix of the same length, so a
            // long query never dilutes the per-verse decision.
            let prefix_len = candidate.chars().count().min(query_chars.len());
            let prefix: String = query_chars[..prefix_len].iter().collect();

            if similarity_ratio(&candidate, &prefix) < EXTENSION_THRESHOLD {
                break;
            }
            concat = candidate;
            end_idx += 1;

            let overall = similarity_ratio(&concat, query);
            debug!(
                "Candidate span {}..={}: {} verse(s), similarity {:.3}",
                verses[start_idx].reference,
                verses[end_idx - 1].reference,
                end_idx - start_idx,
                overall
            );

            if overall > best_score {
                best_score = overall;
                best = Some(VerseSpan {
                    verses: verses[start_idx..end_idx].to_vec(),
                    similarity: overall,
                    start: verses[start_idx].reference,
                    end: verses[end_idx - 1].reference,
                    matched_text: concat.clone(),
                });
            }
        }
    }

    if let Some(span) = &best {
        info!(
            "Best span {}..={} ({} verses, similarity {:.3})",
            span.start,
            span.end,
            span.verses.len(),
            span.similarity
        );
    }

    (best, best_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_query(refs: &[(u16, u16)]) -> String {
        let corpus = QuranCorpus::builtin_sample();
        refs.iter()
            .map(|&(s, a)| corpus.verse(s, a).unwrap().text_normalized.clone())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_exact_surah_matches_fully() {
        let corpus = QuranCorpus::builtin_sample();
        let query = sample_query(&[(112, 1), (112, 2), (112, 3), (112, 4)]);

        let (span, best_score) = search_consecutive(&corpus, &query);
        let span = span.unwrap();

        assert_eq!(span.start, VerseRef::new(112, 1));
        assert_eq!(span.end, VerseRef::new(112, 4));
        assert_eq!(span.verses.len(), 4);
        assert!(span.similarity > 0.99);
        assert_eq!(best_score, span.similarity);
    }

    #[test]
    fn test_span_can_start_mid_surah() {
        let corpus = QuranCorpus::builtin_sample();
        let query = sample_query(&[(1, 5), (1, 6), (1, 7)]);

        let (span, _) = search_consecutive(&corpus, &query);
        let span = span.unwrap();
        assert_eq!(span.start, VerseRef::new(1, 5));
        assert_eq!(span.end, VerseRef::new(1, 7));
    }

    #[test]
    fn test_noisy_query_still_matches() {
        let corpus = QuranCorpus::builtin_sample();
        // One dropped letter and one swapped word ending
        let query = "قل هو الله احد الله الصمد لم يلد ولم يولد ولم يكن له كفوا احد";
        let noisy = query.replace("الصمد", "الصمط");

        let (span, _) = search_consecutive(&corpus, &noisy);
        let span = span.unwrap();
        assert_eq!(span.start, VerseRef::new(112, 1));
        assert_eq!(span.verses.len(), 4);
        assert!(span.similarity >= 0.90);
    }

    #[test]
    fn test_unrelated_text_scores_below_threshold() {
        let corpus = QuranCorpus::builtin_sample();
        let (span, best_score) =
            search_consecutive(&corpus, "هذا نص عربي عادي لا علاقه له بالمصحف ابدا حقا");

        if let Some(span) = span {
            assert!(span.similarity < 0.70, "similarity {}", span.similarity);
        }
        assert!(best_score < 0.70);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let corpus = QuranCorpus::builtin_sample();
        let (span, best_score) = search_consecutive(&corpus, "  ");
        assert!(span.is_none());
        assert_eq!(best_score, 0.0);
    }
}
