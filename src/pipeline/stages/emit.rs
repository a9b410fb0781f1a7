//! Stage 11: write per-verse clips, metadata and README into an archive
//!
//! Clips are encoded as WAV (the source containers are decode-only).
//! Zero-duration verses from the multi-verse fallback are still
//! emitted, using the window of the chunk they share.

use crate::audio::processor::wav_bytes;
use crate::audio::vad::detect_silence;
use crate::error::{AppError, Result};
use crate::pipeline::{Context, Stage, VerseSlice, WordAlignment};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Internal silences shorter than this are not reported (ms)
const GAP_REPORT_MS: u32 = 500;
/// Leading/trailing share of a clip excluded from gap detection
const GAP_EDGE_SHARE: f64 = 0.1;

pub struct Emit;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SilenceGap {
    start_ms: u64,
    end_ms: u64,
    duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerseEntry {
    surah_number: u16,
    ayah_number: u16,
    text: String,
    text_normalized: String,
    word_count: usize,
    start_ms: i64,
    end_ms: i64,
    start_timestamp: String,
    end_timestamp: String,
    duration_seconds: f64,
    match_confidence: f64,
    is_basmalah: bool,
    filename: String,
    source_chunks: Vec<usize>,
    chunk_reuse: bool,
    cutoff_uncertain: bool,
    silence_gaps: Vec<SilenceGap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alignment_method: Option<String>,
    word_alignments: Vec<WordAlignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingMetadata {
    surah_number: u16,
    total_ayahs: usize,
    transcription: String,
    audio_format: String,
    ayahs: Vec<VerseEntry>,
}

impl Stage for Emit {
    fn name(&self) -> &'static str {
        "emit"
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        ctx.audio()?;
        if ctx.verse_slices.is_empty() {
            return Err(AppError::InvalidState("no verse slices to emit".to_string()));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        let audio = ctx.audio()?.clone();

        let surah_number = ctx
            .verse_slices
            .iter()
            .find(|s| !s.verse.is_basmalah)
            .or(ctx.verse_slices.first())
            .map(|s| s.verse.reference.surah)
            .unwrap_or(0);

        std::fs::create_dir_all(&ctx.output_dir)?;
        let archive_path = ctx
            .output_dir
            .join(format!("surah_{:03}_ayahs.zip", surah_number));

        info!(
            "Creating archive {} with {} verse(s)",
            archive_path.display(),
            ctx.verse_slices.len()
        );

        let mut zip = ZipWriter::new(File::create(&archive_path)?);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut entries = Vec::new();
        for slice in &ctx.verse_slices {
            let Some((start_s, end_s)) = emission_window(slice) else {
                warn!(
                    "Skipping verse {}: no usable window",
                    slice.verse.reference
                );
                continue;
            };

            let reference = slice.verse.reference;
            let filename = if slice.verse.is_basmalah {
                format!("surah_{:03}_ayah_000_basmala.wav", reference.surah)
            } else {
                format!("surah_{:03}_ayah_{:03}.wav", reference.surah, reference.ayah)
            };

            let clip = audio.slice_seconds(start_s, end_s);
            zip.start_file(filename.as_str(), options)?;
            zip.write_all(&wav_bytes(clip, audio.sample_rate)?)?;

            let alignments = collect_alignments(ctx, slice);
            let alignment_method = ctx
                .assignments
                .iter()
                .find(|a| a.verse == reference && !a.chunk_reuse)
                .and_then(|a| a.alignment_method)
                .map(|m| format!("{:?}", m).to_lowercase());

            entries.push(VerseEntry {
                surah_number: reference.surah,
                ayah_number: reference.ayah,
                text: slice.verse.text.clone(),
                text_normalized: slice.verse.text_normalized.clone(),
                word_count: slice.verse.word_count,
                start_ms: (start_s * 1000.0).round() as i64,
                end_ms: (end_s * 1000.0).round() as i64,
                start_timestamp: format_timestamp(start_s),
                end_timestamp: format_timestamp(end_s),
                duration_seconds: ((end_s - start_s) * 100.0).round() / 100.0,
                match_confidence: slice.match_confidence,
                is_basmalah: slice.verse.is_basmalah,
                filename,
                source_chunks: slice.chunk_indices.clone(),
                chunk_reuse: slice.zero_duration,
                cutoff_uncertain: slice.cutoff_uncertain,
                silence_gaps: internal_silences(clip, audio.sample_rate, ctx.config.seek_step_ms),
                alignment_method,
                word_alignments: alignments,
            });
        }

        let metadata = RecordingMetadata {
            surah_number,
            total_ayahs: entries.len(),
            transcription: ctx.raw_transcription.clone(),
            audio_format: ctx.source_format.clone(),
            ayahs: entries,
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)?;

        zip.start_file("metadata.json", options)?;
        zip.write_all(metadata_json.as_bytes())?;

        zip.start_file("README.txt", options)?;
        zip.write_all(readme_text(surah_number, metadata.total_ayahs).as_bytes())?;

        zip.finish()?;

        info!(
            "Archive complete: {} clip(s) + metadata",
            metadata.total_ayahs
        );
        ctx.archive_path = Some(archive_path);
        ctx.metadata_json = Some(metadata_json);
        Ok(())
    }
}

/// The window a verse is emitted from: its normalized boundaries, or
/// the shared chunk's window for zero-duration (reused) verses.
fn emission_window(slice: &VerseSlice) -> Option<(f64, f64)> {
    if !slice.zero_duration && slice.normalized_end_s > slice.normalized_start_s {
        Some((slice.normalized_start_s, slice.normalized_end_s))
    } else {
        slice.emit_window.filter(|(start, end)| end > start)
    }
}

/// Word alignments of all chunks belonging to this verse, in time order.
fn collect_alignments(ctx: &Context, slice: &VerseSlice) -> Vec<WordAlignment> {
    let mut owning: Vec<_> = ctx
        .assignments
        .iter()
        .filter(|a| a.verse == slice.verse.reference && !a.chunk_reuse)
        .collect();
    owning.sort_by_key(|a| a.chunk_index);
    owning
        .iter()
        .flat_map(|a| a.word_alignments.iter().cloned())
        .collect()
}

/// Silences inside a clip, excluding the leading and trailing edges.
fn internal_silences(clip: &[f32], sample_rate: u32, seek_step_ms: u32) -> Vec<SilenceGap> {
    let total_ms = (clip.len() as u128 * 1000 / sample_rate as u128) as u64;
    let leading = (total_ms as f64 * GAP_EDGE_SHARE) as u64;
    let trailing = (total_ms as f64 * (1.0 - GAP_EDGE_SHARE)) as u64;

    detect_silence(clip, sample_rate, GAP_REPORT_MS, -40.0, seek_step_ms)
        .into_iter()
        .filter(|&(start, end)| start >= leading && end <= trailing)
        .map(|(start, end)| SilenceGap {
            start_ms: start,
            end_ms: end,
            duration_ms: end - start,
        })
        .collect()
}

/// `HH:MM:SS.mmm`
fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_seconds = total_ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, ms)
}

fn readme_text(surah_number: u16, total_ayahs: usize) -> String {
    format!(
        "Quran Audio Ayah Segments\n\
         ========================\n\n\
         Surah: {}\n\
         Total Ayahs: {}\n\
         Format: wav\n\n\
         Files are named as:\n\
         - surah_XXX_ayah_000_basmala.wav (for the Basmalah, always first)\n\
         - surah_XXX_ayah_YYY.wav (for regular ayahs)\n\n\
         Where:\n\
         - XXX = Surah number (3 digits, zero-padded)\n\
         - YYY = Ayah number (3 digits, zero-padded)\n\n\
         Additional Files:\n\
         - metadata.json: ayah texts, timestamps, confidences and word alignments\n",
        surah_number, total_ayahs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{context_with_audio, slice_for};
    use std::io::Read;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(75.5), "00:01:15.500");
        assert_eq!(format_timestamp(3661.007), "01:01:01.007");
    }

    #[test]
    fn test_emission_window_prefers_normalized() {
        let mut slice = slice_for(112, 1, 1.0, 3.0);
        slice.normalized_start_s = 0.8;
        slice.normalized_end_s = 3.2;
        assert_eq!(emission_window(&slice), Some((0.8, 3.2)));
    }

    #[test]
    fn test_emission_window_reused_verse_borrows() {
        let mut slice = slice_for(112, 2, 0.0, 0.0);
        slice.zero_duration = true;
        slice.emit_window = Some((1.0, 7.0));
        assert_eq!(emission_window(&slice), Some((1.0, 7.0)));

        slice.emit_window = None;
        assert_eq!(emission_window(&slice), None);
    }

    #[test]
    fn test_internal_silences_excludes_edges() {
        let sr = 16000u32;
        // 10s clip: edge silences at both ends plus one internal 0.8s gap
        let mut clip = vec![0.0001f32; sr as usize]; // 0-1s silent (edge)
        clip.extend(vec![0.3f32; sr as usize * 3]); // 1-4s speech
        clip.extend(vec![0.0001f32; (sr as f64 * 0.8) as usize]); // 4-4.8s gap
        clip.extend(vec![0.3f32; (sr as f64 * 4.2) as usize]); // speech
        clip.extend(vec![0.0001f32; sr as usize]); // trailing silence

        let gaps = internal_silences(&clip, sr, 10);
        assert_eq!(gaps.len(), 1);
        let gap = &gaps[0];
        assert!(gap.start_ms >= 3900 && gap.start_ms <= 4100);
        assert!(gap.duration_ms >= 600 && gap.duration_ms <= 1000);
    }

    #[test]
    fn test_emit_writes_archive_with_clips_and_metadata() {
        let dir = std::env::temp_dir().join("rattil_emit_test");
        std::fs::remove_dir_all(&dir).ok();

        let mut ctx = context_with_audio(vec![0.2f32; 16000 * 10], 16000);
        ctx.output_dir = dir.clone();
        ctx.raw_transcription = "قل هو الله احد الله الصمد".to_string();
        ctx.source_format = "mp3".to_string();

        let mut first = slice_for(112, 1, 1.0, 3.0);
        first.normalized_start_s = 1.0;
        first.normalized_end_s = 3.5;
        let mut second = slice_for(112, 2, 4.0, 6.0);
        second.normalized_start_s = 3.5;
        second.normalized_end_s = 6.0;
        ctx.verse_slices = vec![first, second];

        Emit.execute(&mut ctx).unwrap();

        let archive_path = ctx.archive_path.clone().unwrap();
        assert!(archive_path.ends_with("surah_112_ayahs.zip"));

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"surah_112_ayah_001.wav".to_string()));
        assert!(names.contains(&"surah_112_ayah_002.wav".to_string()));
        assert!(names.contains(&"metadata.json".to_string()));
        assert!(names.contains(&"README.txt".to_string()));

        let mut metadata_raw = String::new();
        archive
            .by_name("metadata.json")
            .unwrap()
            .read_to_string(&mut metadata_raw)
            .unwrap();
        let metadata: RecordingMetadata = serde_json::from_str(&metadata_raw).unwrap();
        assert_eq!(metadata.surah_number, 112);
        assert_eq!(metadata.total_ayahs, 2);
        assert_eq!(metadata.audio_format, "mp3");
        assert_eq!(metadata.ayahs[0].start_ms, 1000);
        assert_eq!(metadata.ayahs[0].end_ms, 3500);
        assert_eq!(metadata.ayahs[0].start_timestamp, "00:00:01.000");

        std::fs::remove_dir_all(&dir).ok();
    }
}
