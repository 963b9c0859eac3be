mod analyze;
mod capture;
mod encode;
mod error;
mod recorder;
mod storage;

use std::path::PathBuf;

use anyhow::{Context, Result};
use capture::SourceKind;
use clap::Parser;
use recorder::ProgressCallback;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What to record
    #[arg(value_enum)]
    source: SourceKind,

    /// Recording duration in seconds (5-60)
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Target frames per second
    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// Directory for finished recordings
    #[arg(long, default_value = storage::DEFAULT_CAPTURE_DIR)]
    output_dir: PathBuf,

    /// Prompt to send to the analysis service along with the recording
    #[arg(short, long)]
    prompt: Option<String>,

    /// Analysis service endpoint
    #[arg(long)]
    analyze_url: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Capstudio starting");
    tracing::info!(
        "Recording {} for {}s at target {} fps",
        args.source.as_str(),
        args.duration,
        args.fps
    );

    let progress: ProgressCallback = Box::new(|p| {
        tracing::debug!("recording progress {:.0}%", p * 100.0);
    });

    let artifact = recorder::run_session(
        args.source,
        args.duration,
        args.fps,
        &args.output_dir,
        Some(progress),
    )
    .context("Capture session failed")?;

    let Some(artifact) = artifact else {
        tracing::warn!("No frames were captured; nothing to keep");
        return Ok(());
    };

    tracing::info!(
        "Recording saved to {} ({} frames, {:.2} fps, {:.2}s)",
        artifact.path.display(),
        artifact.frame_count,
        artifact.effective_fps,
        artifact.duration.as_secs_f64()
    );

    // Re-open the finished file for metadata as a playback sanity check.
    match encode::probe_duration(&artifact.path) {
        Ok(seconds) => tracing::info!("Container reports {seconds:.2}s of video"),
        Err(e) => tracing::warn!("Could not probe finished recording: {e}"),
    }

    if let Some(prompt) = &args.prompt {
        let endpoint = args
            .analyze_url
            .as_deref()
            .context("--analyze-url is required when a prompt is given")?;

        let client = analyze::AnalysisClient::new(endpoint)
            .context("Failed to set up analysis client")?;
        let insights = client
            .analyze(&artifact.path, prompt)
            .context("Video analysis failed")?;

        println!("{insights}");
    }

    Ok(())
}
