//! Process one recitation recording end to end.
//!
//! Usage:
//!   rattil <audio-file> --model-dir <dir> [--corpus <verses.json>]
//!          [--output-dir <dir>] [--alignment wav2vec2|dtw|equal]
//!
//! The model directory must contain `model.onnx` plus `vocab.json` or
//! `vocab.txt` for the CTC acoustic model.

use rattil::corpus::QuranCorpus;
use rattil::inference::Wav2Vec2Ctc;
use rattil::{
    process_recording, AlignmentMethod, CancelToken, Context, PipelineConfig, PipelineHandles,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct CliArgs {
    input: PathBuf,
    output_dir: PathBuf,
    model_dir: Option<PathBuf>,
    corpus_path: Option<PathBuf>,
    alignment: AlignmentMethod,
}

fn print_usage() {
    eprintln!(
        "Usage: rattil <audio-file> --model-dir <dir> [--corpus <verses.json>]\n\
         \x20              [--output-dir <dir>] [--alignment wav2vec2|dtw|equal]"
    );
}

fn parse_args() -> Option<CliArgs> {
    let mut input = None;
    let mut output_dir = PathBuf::from("output");
    let mut model_dir = None;
    let mut corpus_path = None;
    let mut alignment = AlignmentMethod::Wav2Vec2;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--output-dir" => output_dir = PathBuf::from(args.next()?),
            "--model-dir" => model_dir = Some(PathBuf::from(args.next()?)),
            "--corpus" => corpus_path = Some(PathBuf::from(args.next()?)),
            "--alignment" => {
                alignment = match args.next()?.as_str() {
                    "wav2vec2" => AlignmentMethod::Wav2Vec2,
                    "dtw" => AlignmentMethod::Dtw,
                    "equal" => AlignmentMethod::Equal,
                    other => {
                        eprintln!("Unknown alignment method: {}", other);
                        return None;
                    }
                }
            }
            "--help" | "-h" => return None,
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            other => {
                eprintln!("Unexpected argument: {}", other);
                return None;
            }
        }
    }

    Some(CliArgs {
        input: input?,
        output_dir,
        model_dir,
        corpus_path,
        alignment,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("rattil=info".parse().unwrap()))
        .init();

    let Some(args) = parse_args() else {
        print_usage();
        return ExitCode::FAILURE;
    };

    let corpus = match &args.corpus_path {
        Some(path) => match QuranCorpus::from_json_file(path) {
            Ok(corpus) => corpus,
            Err(e) => {
                error!("Failed to load corpus: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            warn!("No corpus file given; using the built-in sample corpus");
            QuranCorpus::builtin_sample()
        }
    };

    let Some(model_dir) = &args.model_dir else {
        error!("--model-dir is required (model.onnx + vocab.json)");
        print_usage();
        return ExitCode::FAILURE;
    };
    let engine = match Wav2Vec2Ctc::load(model_dir) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("Failed to load acoustic model: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let handles = PipelineHandles {
        asr: engine.clone(),
        aligner: Some(engine),
        corpus: Arc::new(corpus),
        debug_recorder: None,
    };
    let config = PipelineConfig::default().with_alignment_method(args.alignment);

    info!("Processing {}", args.input.display());
    let mut ctx = Context::new(args.input, args.output_dir, config, handles);

    match process_recording(&mut ctx, &CancelToken::new()) {
        Ok(success) => {
            info!(
                "Done: {} verse clip(s) in {}",
                ctx.verse_slices.len(),
                success.archive_path.display()
            );
            println!("{}", success.archive_path.display());
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(
                "Job failed at stage {} ({}): {}",
                failure.failure_stage, failure.failure_kind, failure.message
            );
            ExitCode::FAILURE
        }
    }
}
