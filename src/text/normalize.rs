//! Arabic text normalization
//!
//! The canonical corpus carries full tashkeel; ASR output usually does
//! too. All matching happens on normalized text: diacritics stripped,
//! letter variants folded, whitespace collapsed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::text::similarity::similarity_ratio;

/// The Basmalah with tashkeel, as recited before most surahs.
pub const BASMALAH: &str = "بِسْمِ اللَّهِ الرَّحْمَٰنِ الرَّحِيمِ";

/// Closing formula sometimes recited after the final verse; it is not
/// part of any surah and is dropped when it ends a recording.
pub const CLOSING_FORMULA: &str = "صدق الله العظيم";

// Combining marks (tashkeel), Quranic annotation signs, and the tatweel.
static RE_DIACRITICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\u{064B}-\u{065F}\u{0670}\u{0610}-\u{061A}\u{06D6}-\u{06ED}\u{0640}]").unwrap()
});

/// Normalize Arabic text for matching.
///
/// Strips diacritics, folds hamza-carrying alef forms to bare alef and
/// taa marbuta to haa, and collapses whitespace runs. Idempotent.
pub fn normalize_arabic(text: &str) -> String {
    let stripped = RE_DIACRITICS.replace_all(text, "");

    let folded: String = stripped
        .chars()
        .map(|c| match c {
            'أ' | 'إ' | 'آ' => 'ا',
            'ة' => 'ه',
            _ => c,
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of whitespace-separated words in (normalized) text.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whether `text` (any form) reads as the Basmalah.
pub fn is_basmalah(text: &str, threshold: f64) -> bool {
    let normalized = normalize_arabic(text);
    let basmalah = normalize_arabic(BASMALAH);

    if normalized.is_empty() {
        return false;
    }
    if normalized.contains(&basmalah) || basmalah.contains(&normalized) {
        return true;
    }
    similarity_ratio(&normalized, &basmalah) >= threshold
}
