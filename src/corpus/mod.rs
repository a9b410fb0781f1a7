//! Canonical verse corpus
//!
//! A read-only mapping from (surah, ayah) to verse text with tashkeel,
//! plus the flat surah-then-ayah ordering the sliding-window search
//! walks. Loadable from a JSON dump; a small built-in sample (common
//! short surahs) backs tests and offline runs.

pub mod search;

use crate::error::{AppError, Result};
use crate::text::{normalize_arabic, word_count, BASMALAH};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Position of a verse: surah 1..=114, ayah 0..=N.
/// `ayah == 0` denotes the surah-opening Basmalah emitted as its own clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    pub surah: u16,
    pub ayah: u16,
}

impl VerseRef {
    pub fn new(surah: u16, ayah: u16) -> Self {
        Self { surah, ayah }
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.surah, self.ayah)
    }
}

/// One canonical verse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verse {
    pub reference: VerseRef,
    /// Text with tashkeel
    pub text: String,
    /// Matching form (diacritics stripped, letters folded)
    pub text_normalized: String,
    pub is_basmalah: bool,
    pub word_count: usize,
}

impl Verse {
    fn from_text(surah: u16, ayah: u16, text: &str) -> Self {
        let text_normalized = normalize_arabic(text);
        let word_count = word_count(&text_normalized);
        Self {
            reference: VerseRef::new(surah, ayah),
            text: text.to_string(),
            text_normalized,
            is_basmalah: false,
            word_count,
        }
    }
}

/// JSON input row for [`QuranCorpus::from_json_file`]
#[derive(Debug, Deserialize)]
struct VerseRow {
    surah: u16,
    ayah: u16,
    text: String,
}

/// Read-only verse store, ordered surah-then-ayah.
pub struct QuranCorpus {
    verses: Vec<Verse>,
    index: HashMap<VerseRef, usize>,
}

impl QuranCorpus {
    fn from_verses(mut verses: Vec<Verse>) -> Self {
        verses.sort_by_key(|v| v.reference);
        let index = verses
            .iter()
            .enumerate()
            .map(|(i, v)| (v.reference, i))
            .collect();
        Self { verses, index }
    }

    /// Load the corpus from a JSON array of `{surah, ayah, text}` rows.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let rows: Vec<VerseRow> = serde_json::from_str(&content)?;
        if rows.is_empty() {
            return Err(AppError::Corpus(format!(
                "corpus file {} contains no verses",
                path.display()
            )));
        }

        let verses = rows
            .iter()
            .map(|row| Verse::from_text(row.surah, row.ayah, &row.text))
            .collect();
        let corpus = Self::from_verses(verses);
        info!(
            "Loaded {} verses from {}",
            corpus.verses.len(),
            path.display()
        );
        Ok(corpus)
    }

    /// Built-in sample corpus: Al-Fatiha plus the short final surahs.
    pub fn builtin_sample() -> Self {
        let rows: &[(u16, u16, &str)] = &[
            // Surah 1 - Al-Fatiha
            (1, 1, "بِسْمِ اللَّهِ الرَّحْمَٰنِ الرَّحِيمِ"),
            (1, 2, "الْحَمْدُ لِلَّهِ رَبِّ الْعَالَمِينَ"),
            (1, 3, "الرَّحْمَٰنِ الرَّحِيمِ"),
            (1, 4, "مَالِكِ يَوْمِ الدِّينِ"),
            (1, 5, "إِيَّاكَ نَعْبُدُ وَإِيَّاكَ نَسْتَعِينُ"),
            (1, 6, "اهْدِنَا الصِّرَاطَ الْمُسْتَقِيمَ"),
            (
                1,
                7,
                "صِرَاطَ الَّذِينَ أَنْعَمْتَ عَلَيْهِمْ غَيْرِ الْمَغْضُوبِ عَلَيْهِمْ وَلَا الضَّالِّينَ",
            ),
            // Surah 111 - Al-Masad
            (111, 1, "تَبَّتْ يَدَا أَبِي لَهَبٍ وَتَبَّ"),
            (111, 2, "مَا أَغْنَىٰ عَنْهُ مَالُهُ وَمَا كَسَبَ"),
            (111, 3, "سَيَصْلَىٰ نَارًا ذَاتَ لَهَبٍ"),
            (111, 4, "وَامْرَأَتُهُ حَمَّالَةَ الْحَطَبِ"),
            (111, 5, "فِي جِيدِهَا حَبْلٌ مِّن مَّسَدٍ"),
            // Surah 112 - Al-Ikhlas
            (112, 1, "قُلْ هُوَ اللَّهُ أَحَدٌ"),
            (112, 2, "اللَّهُ الصَّمَدُ"),
            (112, 3, "لَمْ يَلِدْ وَلَمْ يُولَدْ"),
            (112, 4, "وَلَمْ يَكُن لَّهُ كُفُوًا أَحَدٌ"),
            // Surah 113 - Al-Falaq
            (113, 1, "قُلْ أَعُوذُ بِرَبِّ الْفَلَقِ"),
            (113, 2, "مِن شَرِّ مَا خَلَقَ"),
            (113, 3, "وَمِن شَرِّ غَاسِقٍ إِذَا وَقَبَ"),
            (113, 4, "وَمِن شَرِّ النَّفَّاثَاتِ فِي الْعُقَدِ"),
            (113, 5, "وَمِن شَرِّ حَاسِدٍ إِذَا حَسَدَ"),
            // Surah 114 - An-Nas
            (114, 1, "قُلْ أَعُوذُ بِرَبِّ النَّاسِ"),
            (114, 2, "مَلِكِ النَّاسِ"),
            (114, 3, "إِلَٰهِ النَّاسِ"),
            (114, 4, "مِن شَرِّ الْوَسْوَاسِ الْخَنَّاسِ"),
            (114, 5, "الَّذِي يُوَسْوِسُ فِي صُدُورِ النَّاسِ"),
            (114, 6, "مِنَ الْجِنَّةِ وَالنَّاسِ"),
        ];

        Self::from_verses(
            rows.iter()
                .map(|&(surah, ayah, text)| Verse::from_text(surah, ayah, text))
                .collect(),
        )
    }

    pub fn verse(&self, surah: u16, ayah: u16) -> Option<&Verse> {
        self.index
            .get(&VerseRef::new(surah, ayah))
            .map(|&i| &self.verses[i])
    }

    /// All verses in surah-then-ayah order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &Verse> {
        self.verses.iter()
    }

    pub fn verses(&self) -> &[Verse] {
        &self.verses
    }

    pub fn len(&self) -> usize {
        self.verses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verses.is_empty()
    }

    /// Synthetic standalone Basmalah for `surah`, emitted as ayah 0.
    pub fn basmalah_verse(&self, surah: u16) -> Verse {
        let text_normalized = normalize_arabic(BASMALAH);
        let word_count = word_count(&text_normalized);
        Verse {
            reference: VerseRef::new(surah, 0),
            text: BASMALAH.to_string(),
            text_normalized,
            is_basmalah: true,
            word_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sample_lookup() {
        let corpus = QuranCorpus::builtin_sample();
        let verse = corpus.verse(112, 1).unwrap();
        assert_eq!(verse.text_normalized, "قل هو الله احد");
        assert_eq!(verse.word_count, 4);
        assert!(!verse.is_basmalah);
        assert!(corpus.verse(2, 1).is_none());
    }

    #[test]
    fn test_iter_ordered_is_sorted() {
        let corpus = QuranCorpus::builtin_sample();
        let refs: Vec<VerseRef> = corpus.iter_ordered().map(|v| v.reference).collect();
        let mut sorted = refs.clone();
        sorted.sort();
        assert_eq!(refs, sorted);
        assert_eq!(refs[0], VerseRef::new(1, 1));
    }

    #[test]
    fn test_basmalah_verse_is_synthetic() {
        let corpus = QuranCorpus::builtin_sample();
        let basmalah = corpus.basmalah_verse(112);
        assert_eq!(basmalah.reference, VerseRef::new(112, 0));
        assert!(basmalah.is_basmalah);
        assert_eq!(basmalah.word_count, 4);
    }

    #[test]
    fn test_from_json_file() {
        let dir = std::env::temp_dir().join("rattil_corpus_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corpus.json");
        std::fs::write(
            &path,
            r#"[{"surah": 112, "ayah": 2, "text": "اللَّهُ الصَّمَدُ"},
                {"surah": 112, "ayah": 1, "text": "قُلْ هُوَ اللَّهُ أَحَدٌ"}]"#,
        )
        .unwrap();

        let corpus = QuranCorpus::from_json_file(&path).unwrap();
        assert_eq!(corpus.len(), 2);
        // Sorted on load even when the file is not
        assert_eq!(
            corpus.iter_ordered().next().unwrap().reference,
            VerseRef::new(112, 1)
        );

        std::fs::remove_file(&path).ok();
    }
}
