//! Shared pipeline test helpers and end-to-end runs with a scripted ASR.

use crate::audio::processor::write_wav;
use crate::audio::AudioBuffer;
use crate::config::{AlignmentMethod, PipelineConfig};
use crate::corpus::{QuranCorpus, VerseRef};
use crate::error::Result;
use crate::inference::AsrEngine;
use crate::job::CancelToken;
use crate::pipeline::{Chunk, ChunkAssignment, Context, Orchestrator, PipelineHandles, VerseSlice};
use crate::text::{normalize_arabic, word_count};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// ASR stub returning pre-scripted transcripts in call order.
pub struct ScriptedAsr {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedAsr {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AsrEngine for ScriptedAsr {
    fn name(&self) -> &str {
        "scripted"
    }

    fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }
}

pub fn test_handles() -> PipelineHandles {
    PipelineHandles {
        asr: Arc::new(ScriptedAsr::new(&[])),
        aligner: None,
        corpus: Arc::new(QuranCorpus::builtin_sample()),
        debug_recorder: None,
    }
}

pub fn test_context(input: &Path) -> Context {
    Context::new(
        input.to_path_buf(),
        std::env::temp_dir().join("rattil_pipeline_out"),
        PipelineConfig::default(),
        test_handles(),
    )
}

pub fn context_with_audio(samples: Vec<f32>, sample_rate: u32) -> Context {
    let mut ctx = test_context(Path::new("/tmp/test_input.wav"));
    ctx.audio = Some(AudioBuffer::new(samples, sample_rate));
    ctx
}

/// Quiet buffer with louder speech planted over the given second ranges.
pub fn planted_speech(bursts: &[(f64, f64)], total_s: f64) -> Vec<f32> {
    let sr = 16000usize;
    let mut samples = vec![0.0001f32; (total_s * sr as f64) as usize];
    for &(start_s, end_s) in bursts {
        let begin = (start_s * sr as f64) as usize;
        let end = ((end_s * sr as f64) as usize).min(samples.len());
        for sample in &mut samples[begin..end] {
            *sample = 0.3;
        }
    }
    samples
}

pub fn chunk_with_text(index: usize, start_s: f64, end_s: f64, text: &str) -> Chunk {
    let mut chunk = Chunk::at(index, start_s, end_s);
    chunk.text = text.to_string();
    chunk.text_normalized = normalize_arabic(text);
    chunk.word_count = word_count(&chunk.text_normalized);
    chunk
}

pub fn assignment(
    chunk_index: usize,
    start_s: f64,
    end_s: f64,
    verse: VerseRef,
    chunk_reuse: bool,
) -> ChunkAssignment {
    ChunkAssignment {
        chunk_index,
        start_s,
        end_s,
        verse,
        confidence: 1.0,
        chunk_reuse,
        word_alignments: Vec::new(),
        omitted_alignments: Vec::new(),
        alignment_method: None,
        alignment_degraded: false,
    }
}

pub fn slice_for(surah: u16, ayah: u16, start_s: f64, end_s: f64) -> VerseSlice {
    let verse = QuranCorpus::builtin_sample()
        .verse(surah, ayah)
        .unwrap()
        .clone();
    VerseSlice {
        verse,
        chunk_indices: vec![0],
        start_s,
        end_s,
        duration_s: end_s - start_s,
        normalized_start_s: start_s,
        normalized_end_s: end_s,
        prev_gap_s: 0.0,
        cutoff_uncertain: false,
        zero_duration: false,
        match_confidence: 1.0,
        emit_window: None,
    }
}

// ---------------------------------------------------------------------
// End-to-end runs
// ---------------------------------------------------------------------

/// ~9s recording shaped like Al-Ikhlas: four bursts with clean silences.
fn write_ikhlas_wav(path: &Path) {
    let sr = 22050usize;
    let total_s = 9.0;
    let mut samples = vec![0.0f32; (total_s * sr as f64) as usize];
    for i in 0..4 {
        let start = ((0.5 + i as f64 * 2.0) * sr as f64) as usize;
        let end = ((1.7 + i as f64 * 2.0) * sr as f64) as usize;
        for sample in &mut samples[start..end] {
            *sample = 0.3;
        }
    }
    write_wav(&samples, sr as u32, path).unwrap();
}

fn ikhlas_texts() -> Vec<String> {
    let corpus = QuranCorpus::builtin_sample();
    (1..=4u16)
        .map(|a| corpus.verse(112, a).unwrap().text.clone())
        .collect()
}

fn run_full_pipeline(input: &Path, out_tag: &str, scripted: &[&str]) -> (Context, std::result::Result<(), crate::error::StageError>) {
    let mut handles = test_handles();
    handles.asr = Arc::new(ScriptedAsr::new(scripted));

    let config = PipelineConfig::default().with_alignment_method(AlignmentMethod::Equal);
    let mut ctx = Context::new(
        input.to_path_buf(),
        std::env::temp_dir().join(out_tag),
        config,
        handles,
    );
    let outcome = Orchestrator::standard().run(&mut ctx, &CancelToken::new());
    (ctx, outcome)
}

#[test]
fn test_full_pipeline_al_ikhlas() {
    let dir = std::env::temp_dir().join("rattil_e2e_ikhlas");
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("recitation.wav");
    write_ikhlas_wav(&input);

    let texts = ikhlas_texts();
    let scripted: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
    let (ctx, outcome) = run_full_pipeline(&input, "rattil_e2e_ikhlas_out", &scripted);
    outcome.unwrap();

    // Chunks: strictly ordered, non-overlapping
    assert_eq!(ctx.chunks.len(), 4);
    for pair in ctx.chunks.windows(2) {
        assert!(pair[0].end_s <= pair[1].start_s);
    }

    // Exact word-count assignment for every verse
    let matched = ctx.matched.as_ref().unwrap();
    assert_eq!(matched.verses.len(), 4);
    assert!(matched.similarity >= 0.95);
    for assignment in &ctx.assignments {
        assert_eq!(assignment.confidence, 1.0);
        assert!(!assignment.chunk_reuse);
    }

    // Verse boundaries: adjacent normalized edges meet exactly, and each
    // moved by half the original gap
    assert_eq!(ctx.verse_slices.len(), 4);
    for pair in ctx.verse_slices.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert_eq!(a.normalized_end_s, b.normalized_start_s);
        let gap = b.start_s - a.end_s;
        assert!(gap > 0.0);
        assert!((a.normalized_end_s - (a.end_s + gap / 2.0)).abs() < 0.001);
        assert!(!a.cutoff_uncertain);
    }

    // Word alignments stay inside their chunk, time-ordered
    for assignment in &ctx.assignments {
        for alignment in &assignment.word_alignments {
            assert!(alignment.start_s >= assignment.start_s - 0.02);
            assert!(alignment.end_s <= assignment.end_s + 0.02);
            assert!(alignment.start_s <= alignment.end_s);
        }
        assert!(!assignment.word_alignments.is_empty());
    }

    // Archive with four clips plus metadata
    let archive_path = ctx.archive_path.clone().unwrap();
    assert!(archive_path.exists());
    let metadata: serde_json::Value =
        serde_json::from_str(ctx.metadata_json.as_ref().unwrap()).unwrap();
    assert_eq!(metadata["surahNumber"], 112);
    assert_eq!(metadata["totalAyahs"], 4);
    assert_eq!(metadata["ayahs"].as_array().unwrap().len(), 4);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_full_pipeline_is_deterministic() {
    let dir = std::env::temp_dir().join("rattil_e2e_determinism");
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("recitation.wav");
    write_ikhlas_wav(&input);

    let texts = ikhlas_texts();
    let scripted: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();

    let (first, outcome1) = run_full_pipeline(&input, "rattil_e2e_det_out1", &scripted);
    outcome1.unwrap();
    let (second, outcome2) = run_full_pipeline(&input, "rattil_e2e_det_out2", &scripted);
    outcome2.unwrap();

    assert_eq!(first.metadata_json, second.metadata_json);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_silence_only_recording_surfaces_no_match() {
    let dir = std::env::temp_dir().join("rattil_e2e_silence");
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("silence.wav");
    write_wav(&vec![0.0f32; 16000 * 3], 16000, &input).unwrap();

    let (ctx, outcome) = run_full_pipeline(&input, "rattil_e2e_silence_out", &[""]);
    let err = outcome.unwrap_err();

    assert_eq!(err.stage, "verse_match");
    assert_eq!(err.source.kind(), "no_match");
    // SilenceSegment kept the whole buffer as one chunk
    assert_eq!(ctx.chunks.len(), 1);
    assert!(ctx.archive_path.is_none());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_cancellation_stops_before_first_stage() {
    let input = std::env::temp_dir().join("rattil_e2e_cancel.wav");
    write_wav(&vec![0.2f32; 16000], 16000, &input).unwrap();

    let mut ctx = test_context(&input);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = Orchestrator::standard().run(&mut ctx, &cancel).unwrap_err();
    assert_eq!(err.stage, "resample");
    assert!(ctx.audio.is_none());

    std::fs::remove_file(&input).ok();
}
