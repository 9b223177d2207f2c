//! streamcast
//!
//! Builds the startup scene from the config file, previews it and
//! optionally records until Ctrl+C or a fixed duration.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use streamcast::config::{Config, SourceEntry};
use streamcast::control::{Pipeline, PipelineOptions};
use streamcast::session::FatalPolicy;
use streamcast::{crash, logging};

struct Args {
    record: bool,
    duration: Option<Duration>,
}

fn parse_args() -> Result<Option<Args>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(None);
    }

    let mut parsed = Args {
        record: false,
        duration: None,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-r" | "--record" => parsed.record = true,
            "-d" | "--duration" => {
                let value = iter.next().context("--duration needs a number of seconds")?;
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid duration: {}", value))?;
                parsed.duration = Some(Duration::from_secs(secs));
            }
            other => warn!("Ignoring unknown argument: {}", other),
        }
    }
    Ok(Some(parsed))
}

fn main() -> Result<()> {
    let _log_guard = logging::init_logging()?;
    match logging::get_log_dir().map(|dir| crash::init_crash_handler(&dir)) {
        Ok(Ok(path)) => info!("Crash log at {:?}", path),
        Ok(Err(e)) => warn!("Failed to initialize crash handler: {}", e),
        Err(e) => warn!("Failed to resolve log directory: {}", e),
    }

    info!("streamcast {} starting...", env!("CARGO_PKG_VERSION"));

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let config = Config::load()?;
    let settings = config.load_pipeline_config()?;
    info!(
        "Recording into {:?} at {}x{}",
        settings.output.output_folder, settings.video.width_frame, settings.video.height_frame
    );

    let pipeline = Pipeline::new(
        settings,
        PipelineOptions {
            fatal_policy: FatalPolicy::Abort,
            worker_threads: config.runtime.worker_threads,
            ..Default::default()
        },
    )?;

    let scene = pipeline.root_scene();
    for source in &config.scene.sources {
        let added = match source {
            SourceEntry::Display { .. } => source
                .display_device()
                .map(|device| pipeline.add_display_capture(scene, source.name(), device)),
            SourceEntry::Webcam { .. } => source
                .vidcap_device()
                .map(|device| pipeline.add_vidcap_capture(scene, source.name(), device)),
            SourceEntry::Audio { .. } => source
                .audio_device()
                .map(|device| pipeline.add_audio_capture(scene, source.name(), device)),
        };
        match added {
            Some(Ok(Some(id))) => info!("Added source '{}' as {}", source.name(), id),
            Some(Ok(None)) => warn!("Skipping duplicate source name '{}'", source.name()),
            Some(Err(e)) => error!("Failed to add source '{}': {}", source.name(), e),
            None => {}
        }
    }

    pipeline.activate()?;
    info!("Preview running");

    if args.record || config.recording.autostart_on_launch {
        pipeline.start_recording()?;
    }

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = stop_tx.send(());
    })?;

    match args.duration {
        Some(duration) => {
            let failure = pipeline.failure().clone();
            let deadline = std::time::Instant::now() + duration;
            loop {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() || stop_rx.try_recv().is_ok() {
                    break;
                }
                if let Some(reason) = failure.wait_timeout(remaining.min(Duration::from_millis(200))) {
                    error!("Pipeline failed: {}", reason);
                    break;
                }
            }
        }
        None => {
            info!("Press Ctrl+C to exit...");
            let _ = stop_rx.blocking_recv();
        }
    }

    if pipeline.is_recording()? {
        pipeline.stop_recording()?;
    }

    let snapshot = pipeline.snapshot()?;
    if let Some(stats) = snapshot.video_stats {
        info!(
            "Video: {} packets, {} with frames",
            stats.packets, stats.packets_with_frames
        );
    }
    if let Some(stats) = snapshot.audio_stats {
        info!(
            "Audio: {} packets, {} with frames",
            stats.packets, stats.packets_with_frames
        );
    }

    drop(pipeline);
    info!("Shutdown complete");
    Ok(())
}

fn print_help() {
    println!("streamcast - screen and audio capture pipeline");
    println!();
    println!("USAGE:");
    println!("    streamcast [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help               Print this help message");
    println!("    -r, --record             Start recording right away");
    println!("    -d, --duration <SECS>    Stop after SECS seconds");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                 Set log level (e.g., debug, info, warn)");
    println!("    STREAMCAST_LOG_PATH      Override the log directory");
}
