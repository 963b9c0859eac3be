//! Video encoding via an external ffmpeg process.
//!
//! The primary container write depends on how the frames were captured:
//! camera sessions pipe raw RGB straight into ffmpeg, screen sessions dump
//! JPEGs into a scratch directory and encode that. Either way the result is
//! re-encoded to H.264 8-bit yuv420p and swapped into place atomically, so
//! the canonical path never holds a half-written file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use crate::capture::SourceKind;
use crate::error::SessionError;
use crate::recorder::FrameSequence;

/// The finalized recording on disk.
#[derive(Debug, Clone)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub frame_count: usize,
    /// Actual captured frames over actual elapsed time, as handed to ffmpeg.
    pub effective_fps: f64,
    pub duration: Duration,
}

/// Encode a sealed frame sequence into a normalized artifact at
/// `output_path`.
///
/// The sequence must be non-empty; the orchestrator reports zero frames as
/// an empty result without ever calling in here.
pub fn encode_session(
    sequence: &FrameSequence,
    kind: SourceKind,
    output_path: &Path,
) -> Result<VideoArtifact, SessionError> {
    let (width, height) = sequence.dimensions().ok_or_else(|| {
        SessionError::Encode("refusing to encode an empty frame sequence".to_string())
    })?;
    let fps = sequence.effective_fps();

    match kind {
        SourceKind::Camera => write_raw_pipe(sequence, width, height, fps, output_path)?,
        SourceKind::Screen => write_from_scratch(sequence, fps, output_path)?,
    }

    normalize(output_path, fps)?;

    tracing::info!(
        "encoded {} ({} frames, {:.2} fps, {:.2}s)",
        output_path.display(),
        sequence.len(),
        fps,
        sequence.elapsed().as_secs_f64()
    );

    Ok(VideoArtifact {
        path: output_path.to_path_buf(),
        frame_count: sequence.len(),
        effective_fps: fps,
        duration: sequence.elapsed(),
    })
}

/// Direct container write: raw RGB24 frames streamed over ffmpeg's stdin.
fn write_raw_pipe(
    sequence: &FrameSequence,
    width: u32,
    height: u32,
    fps: f64,
    output_path: &Path,
) -> Result<(), SessionError> {
    let args = raw_pipe_args(width, height, fps, output_path);
    tracing::debug!("primary encode: ffmpeg {}", args.join(" "));

    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SessionError::Encode(format!("failed to launch ffmpeg: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| SessionError::Encode("ffmpeg stdin unavailable".to_string()))?;

    let streamed = sequence
        .frames()
        .iter()
        .try_for_each(|frame| stdin.write_all(frame.as_raw()));
    drop(stdin);

    if let Err(e) = streamed {
        let _ = child.kill();
        let _ = child.wait();
        return Err(SessionError::Encode(format!(
            "failed to stream frames to ffmpeg: {e}"
        )));
    }

    let output = child
        .wait_with_output()
        .map_err(|e| SessionError::Encode(format!("failed to wait for ffmpeg: {e}")))?;
    ensure_success("primary encode", &output)
}

/// Scratch-directory write: one JPEG per frame, then a directory-to-video
/// pass. The input frame rate and the output fps filter are pinned to the
/// same effective rate; some builds otherwise default the image2 reader to
/// 25 fps and drift the duration.
fn write_from_scratch(
    sequence: &FrameSequence,
    fps: f64,
    output_path: &Path,
) -> Result<(), SessionError> {
    let scratch = tempfile::Builder::new()
        .prefix("capstudio-frames-")
        .tempdir()?;

    for (i, frame) in sequence.frames().iter().enumerate() {
        let frame_path = scratch.path().join(format!("frame_{i:04}.jpg"));
        frame.save(&frame_path).map_err(|e| {
            SessionError::Encode(format!("failed to write scratch frame {i}: {e}"))
        })?;
    }

    let pattern = scratch.path().join("frame_%04d.jpg");
    let args = dir_encode_args(&pattern, fps, sequence.elapsed(), output_path);
    run_ffmpeg("scratch encode", &args)
    // Scratch removal on success and failure alike is the TempDir drop.
}

/// Re-encode the artifact to the compatibility profile and atomically swap
/// it into place.
///
/// The staged file is promoted only after ffmpeg reports success and the
/// output is non-empty; on any failure the temp is dropped and the
/// pre-normalization artifact stays at the canonical path.
fn normalize(path: &Path, fps: f64) -> Result<(), SessionError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let staged = tempfile::Builder::new()
        .prefix("normalize-")
        .suffix(".mp4")
        .tempfile_in(parent.unwrap_or_else(|| Path::new(".")))?;

    let args = normalize_args(path, fps, staged.path());
    run_ffmpeg("normalization", &args)?;

    let written = staged.as_file().metadata()?.len();
    if written == 0 {
        return Err(SessionError::Encode(
            "normalization produced an empty file".to_string(),
        ));
    }

    staged.persist(path).map_err(|e| {
        SessionError::Encode(format!("failed to swap normalized artifact into place: {e}"))
    })?;
    Ok(())
}

/// Container-reported duration of a finished artifact, via ffprobe.
pub fn probe_duration(path: &Path) -> Result<f64, SessionError> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .output()
        .map_err(|e| SessionError::Encode(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(SessionError::Encode(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.trim();
    value.parse::<f64>().map_err(|e| {
        SessionError::Encode(format!("unparsable ffprobe duration '{value}': {e}"))
    })
}

fn raw_pipe_args(width: u32, height: u32, fps: f64, output_path: &Path) -> Vec<String> {
    vec![
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        "rgb24".to_string(),
        "-video_size".to_string(),
        format!("{width}x{height}"),
        "-framerate".to_string(),
        fmt_fps(fps),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "mpeg4".to_string(),
        "-q:v".to_string(),
        "5".to_string(),
        "-y".to_string(),
        output_path.to_string_lossy().into_owned(),
    ]
}

fn dir_encode_args(
    pattern: &Path,
    fps: f64,
    duration: Duration,
    output_path: &Path,
) -> Vec<String> {
    vec![
        "-framerate".to_string(),
        fmt_fps(fps),
        "-i".to_string(),
        pattern.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-vf".to_string(),
        format!("fps={}", fmt_fps(fps)),
        "-t".to_string(),
        format!("{:.3}", duration.as_secs_f64()),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-y".to_string(),
        output_path.to_string_lossy().into_owned(),
    ]
}

fn normalize_args(source: &Path, fps: f64, staged: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-r".to_string(),
        fmt_fps(fps),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        "-y".to_string(),
        staged.to_string_lossy().into_owned(),
    ]
}

fn fmt_fps(fps: f64) -> String {
    format!("{fps:.3}")
}

fn run_ffmpeg(stage: &str, args: &[String]) -> Result<(), SessionError> {
    tracing::debug!("{stage}: ffmpeg {}", args.join(" "));
    let output = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SessionError::Encode(format!("{stage}: failed to launch ffmpeg: {e}")))?;
    ensure_success(stage, &output)
}

fn ensure_success(stage: &str, output: &Output) -> Result<(), SessionError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(4)..].join(" | ");
    Err(SessionError::Encode(format!(
        "{stage}: ffmpeg exited with {}: {tail}",
        output.status
    )))
}
