//! Command-line client: record from the default microphone and stream it to
//! a transcription server, printing transcript events as they arrive.

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;

use streamscribe::transcript::TranscriptSink;
use streamscribe::{
    load_settings, save_settings, spawn_session, State, TranscriptCollector, TranscriptEvent,
};

#[derive(Parser, Debug)]
#[command(name = "streamscribe")]
#[command(about = "Stream microphone audio to a WebSocket transcription server")]
struct Args {
    /// WebSocket address of the server (defaults to the saved setting)
    address: Option<String>,

    /// ISO language code; omit or pass "auto" for automatic detection
    #[arg(long)]
    language: Option<String>,

    /// Buffering strategy: "immediate" or "silence_at_end_of_chunk"
    #[arg(long)]
    strategy: Option<String>,

    /// Chunk length in seconds (silence_at_end_of_chunk only)
    #[arg(long)]
    chunk_length: Option<f64>,

    /// Chunk offset in seconds (silence_at_end_of_chunk only)
    #[arg(long)]
    chunk_offset: Option<f64>,

    /// Seconds to record before stopping automatically (0 = until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Persist the resolved address and options as the new defaults
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present; production uses real env vars
    let _ = dotenvy::dotenv();
    env_logger::init();

    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(address) = args.address {
        settings.server_address = address;
    }
    if let Some(language) = args.language {
        settings.language = if language == "auto" { None } else { Some(language) };
    }
    if let Some(strategy) = args.strategy {
        settings.buffering_strategy = strategy;
    }
    if let Some(len) = args.chunk_length {
        settings.chunk_length_seconds = len;
    }
    if let Some(offset) = args.chunk_offset {
        settings.chunk_offset_seconds = offset;
    }

    let address = settings.server_address.clone();
    let options = settings.recording_options();

    if args.save {
        match save_settings(&settings) {
            Ok(()) => log::info!("Settings saved"),
            Err(e) => log::warn!("Failed to save settings: {}", e),
        }
    }

    // Print transcripts as they arrive and keep a copy for the summary.
    let collector = Arc::new(Mutex::new(TranscriptCollector::new()));
    let mut sink_collector = collector.clone();
    let sink = move |event: TranscriptEvent| {
        if !event.text.is_empty() {
            println!("{}", event.text);
        }
        if let Some(words) = &event.words {
            for w in words {
                log::debug!("word {:?} p={:.2}", w.word, w.probability);
            }
        }
        sink_collector.on_event(event);
    };

    let (mut handle, mut errors) = spawn_session(Box::new(sink));

    handle.connect(&address).await;
    match handle
        .wait_for(|s| matches!(s, State::Connected | State::Idle))
        .await
    {
        Some(State::Connected) => log::info!("Connected to {}", address),
        _ => {
            if let Ok(err) = errors.try_recv() {
                eprintln!("{}", err);
            } else {
                eprintln!("Connection to {} failed", address);
            }
            return ExitCode::FAILURE;
        }
    }

    handle.start_recording(options).await;
    tokio::select! {
        state = handle.wait_for(|s| matches!(s, State::Recording { .. })) => {
            if state.is_none() {
                eprintln!("Session ended unexpectedly");
                return ExitCode::FAILURE;
            }
            log::info!("Recording started");
        }
        err = errors.recv() => {
            match err {
                Some(err) => eprintln!("{}", err),
                None => eprintln!("Session ended unexpectedly"),
            }
            handle.disconnect().await;
            return ExitCode::FAILURE;
        }
    }

    // Record until the duration elapses, Ctrl-C, or the session tears down
    // on its own (e.g. the server closed the connection).
    let mut teardown_handle = handle.clone();
    tokio::select! {
        _ = record_window(args.duration) => {}
        _ = teardown_handle.wait_for(|s| matches!(s, State::Idle)) => {
            if let Ok(err) = errors.try_recv() {
                eprintln!("{}", err);
            }
        }
    }

    handle.stop_recording().await;
    handle
        .wait_for(|s| matches!(s, State::Connected | State::Idle))
        .await;
    handle.disconnect().await;
    handle.wait_for(|s| matches!(s, State::Idle)).await;

    let collector = collector.lock().unwrap();
    if let Some((language, probability)) = collector.language() {
        match probability {
            Some(p) => log::info!("Detected language: {} ({:.2})", language, p),
            None => log::info!("Detected language: {}", language),
        }
    }
    if let Some(t) = collector.last_processing_time() {
        log::info!("Last processing time: {:.2}s", t);
    }

    ExitCode::SUCCESS
}

async fn record_window(duration_secs: u64) {
    if duration_secs > 0 {
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;
    } else if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
