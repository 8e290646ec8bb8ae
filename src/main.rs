use std::time::Duration;

use clap::Parser;
use franken_captions::audio::{Decoder, FfmpegDecoder};
use franken_captions::backend::WhisperCppEngine;
use franken_captions::cli::{Cli, Command, ProbeArgs, RunArgs, ShutdownController};
use franken_captions::sink::format_line;
use franken_captions::status::status_channel;
use franken_captions::{ChunkTranscriber, FcError, FcResult, Session};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(40);

fn main() {
    franken_captions::logging::init();

    if let Err(e) = ShutdownController::install(None) {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }

    if let Err(error) = run() {
        if ShutdownController::is_shutting_down() || matches!(error, FcError::Cancelled(_)) {
            eprintln!("interrupted");
            std::process::exit(ShutdownController::signal_exit_code());
        }
        eprintln!("error: {error}");
        std::process::exit(1);
    }

    if ShutdownController::is_shutting_down() {
        std::process::exit(ShutdownController::signal_exit_code());
    }
}

fn run() -> FcResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_video(&args),
        Command::Probe(args) => probe_video(&args),
    }
}

fn run_video(args: &RunArgs) -> FcResult<()> {
    let config = args.to_config()?;
    let mut engine = WhisperCppEngine::from_env();
    if let Some(model) = &args.model {
        engine = engine.with_model_path(model.clone());
    }

    let (reporter, receiver) = status_channel();
    let transcriber =
        ChunkTranscriber::new(Box::new(FfmpegDecoder::from_env()), Box::new(engine), config)
            .with_status(reporter);
    let mut session = Session::new(transcriber);
    session.start(args.video.clone())?;

    // The reporter lives inside the session, so the channel never
    // disconnects; the worker finishing ends the loop.
    loop {
        if ShutdownController::is_shutting_down() {
            session.cancel();
        }
        match receiver.recv_timeout(STATUS_POLL_INTERVAL) {
            Some(update) => eprintln!("{update}"),
            None => {
                if !session.is_running() {
                    break;
                }
            }
        }
    }
    for update in receiver.drain() {
        eprintln!("{update}");
    }

    let summary = session.join()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for segment in session.store().snapshot() {
            println!("{}", format_line(&segment));
        }
        eprintln!(
            "run {}: {} chunk(s), {} translated segment(s) over {:.1}s",
            summary.run_id,
            summary.chunks_processed,
            summary.translated_segments,
            summary.total_duration_secs
        );
        for path in &summary.subtitle_paths {
            eprintln!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn probe_video(args: &ProbeArgs) -> FcResult<()> {
    let info = FfmpegDecoder::from_env().probe(&args.video)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("duration: {:.3}s", info.duration_secs);
        println!("decode sample rate: {} Hz", info.sample_rate);
    }
    Ok(())
}
