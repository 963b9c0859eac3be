//! Timed capture loop and session orchestration.
//!
//! A session drives one [`FrameSource`] at a target rate for a bounded
//! wall-clock duration, buffers the frames, and hands the sealed sequence to
//! the encoder. Pacing is self-correcting: each iteration sleeps the target
//! interval minus the time the capture itself took, clamped at zero, so a
//! slow source lowers the effective rate instead of stretching the
//! recording.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::capture::{CameraSource, FrameSource, ScreenSource, SourceKind};
use crate::encode::{self, VideoArtifact};
use crate::error::SessionError;
use crate::storage;

/// Allowed recording length in seconds.
pub const MIN_DURATION_SECS: u64 = 5;
pub const MAX_DURATION_SECS: u64 = 60;

/// Collaborator that receives progress values in `[0.0, 1.0]`,
/// non-decreasing within one session.
pub type ProgressCallback = Box<dyn Fn(f32) + Send>;

/// One run of the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub kind: SourceKind,
    pub duration: Duration,
    pub target_fps: u32,
}

impl CaptureSession {
    pub fn new(kind: SourceKind, duration_seconds: u64, target_fps: u32) -> Result<Self, SessionError> {
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration_seconds) {
            return Err(SessionError::Session(format!(
                "duration must be {MIN_DURATION_SECS}-{MAX_DURATION_SECS} seconds, got {duration_seconds}"
            )));
        }
        if target_fps == 0 {
            return Err(SessionError::Session(
                "target frame rate must be at least 1 fps".to_string(),
            ));
        }
        Ok(Self {
            kind,
            duration: Duration::from_secs(duration_seconds),
            target_fps,
        })
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps))
    }
}

/// Frames collected by one session, in capture order.
///
/// Grows only during the capture loop; read-only once sealed. The effective
/// frame rate comes from the actual count over the actual elapsed time,
/// never the requested target rate, so the encoded file's claimed duration
/// matches the wall clock.
pub struct FrameSequence {
    frames: Vec<RgbImage>,
    offsets: Vec<Duration>,
    elapsed: Duration,
}

impl FrameSequence {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            offsets: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn push(&mut self, frame: RgbImage, offset: Duration) -> Result<(), SessionError> {
        if let Some(first) = self.frames.first() {
            if first.dimensions() != frame.dimensions() {
                return Err(SessionError::Capture(format!(
                    "frame geometry changed mid-session: {:?} then {:?}",
                    first.dimensions(),
                    frame.dimensions()
                )));
            }
        }
        self.frames.push(frame);
        self.offsets.push(offset);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    /// Elapsed capture time of each frame relative to session start.
    pub fn offsets(&self) -> &[Duration] {
        &self.offsets
    }

    /// Wall-clock span of the whole capture.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(|f| f.dimensions())
    }

    /// Actual frames per second achieved by the capture loop.
    pub fn effective_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames.len() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Drive `source` at the session's target rate until the wall clock runs
/// out.
///
/// A capture failure before any frame was collected yields an empty
/// sequence (zero frames is a valid session outcome); a failure after that
/// aborts with [`SessionError::Capture`] and no partial artifact. On normal
/// completion the final progress report is exactly 1.0.
pub fn capture_frames(
    source: &mut dyn FrameSource,
    session: &CaptureSession,
    progress: Option<&ProgressCallback>,
) -> Result<FrameSequence, SessionError> {
    let interval = session.frame_interval();
    let duration_secs = session.duration.as_secs_f64();
    let start = Instant::now();
    let mut sequence = FrameSequence::new();

    while start.elapsed() < session.duration {
        let iteration_start = Instant::now();

        let frame = match source.capture_one() {
            Ok(frame) => frame,
            Err(e) if sequence.is_empty() => {
                tracing::warn!("source produced no frames: {e}");
                return Ok(sequence);
            }
            Err(e) => return Err(e),
        };

        let offset = start.elapsed();
        sequence.push(frame, offset)?;

        if let Some(report) = progress {
            report((offset.as_secs_f64() / duration_secs).min(1.0) as f32);
        }

        let spent = iteration_start.elapsed();
        if spent < interval {
            thread::sleep(interval - spent);
        }
    }

    sequence.elapsed = start.elapsed();

    tracing::debug!(
        "captured {} frames over {:.2}s (effective {:.2} fps, target {})",
        sequence.len(),
        sequence.elapsed.as_secs_f64(),
        sequence.effective_fps(),
        session.target_fps
    );

    if let Some(report) = progress {
        if !sequence.is_empty() {
            report(1.0);
        }
    }

    Ok(sequence)
}

/// Run one full capture session end to end.
///
/// `Ok(None)` means the source produced no frames at all; any other failure
/// surfaces as a typed error with the device released either way.
pub fn run_session(
    kind: SourceKind,
    duration_seconds: u64,
    target_fps: u32,
    output_dir: &Path,
    progress: Option<ProgressCallback>,
) -> Result<Option<VideoArtifact>, SessionError> {
    let session = CaptureSession::new(kind, duration_seconds, target_fps)?;

    let mut source: Box<dyn FrameSource> = match kind {
        SourceKind::Camera => Box::new(CameraSource::open(0)?),
        SourceKind::Screen => Box::new(ScreenSource::open()?),
    };

    run_with_source(source.as_mut(), &session, output_dir, progress.as_ref())
}

/// Orchestration seam over an already-open source.
///
/// Closes the source exactly once on every exit path.
pub(crate) fn run_with_source(
    source: &mut dyn FrameSource,
    session: &CaptureSession,
    output_dir: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<Option<VideoArtifact>, SessionError> {
    let captured = capture_frames(source, session, progress);
    source.close();
    let sequence = captured?;

    if sequence.is_empty() {
        tracing::warn!("no frames captured, skipping encode");
        return Ok(None);
    }

    let output_path = storage::artifact_path(output_dir, session.kind)?;
    let artifact = encode::encode_session(&sequence, session.kind, &output_path)?;
    Ok(Some(artifact))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct ScriptedSource {
        width: u32,
        height: u32,
        latency: Duration,
        fail_on: Option<usize>,
        calls: usize,
        closes: usize,
    }

    impl ScriptedSource {
        fn new(latency: Duration) -> Self {
            Self {
                width: 32,
                height: 24,
                latency,
                fail_on: None,
                calls: 0,
                closes: 0,
            }
        }

        fn failing_on(latency: Duration, call: usize) -> Self {
            let mut source = Self::new(latency);
            source.fail_on = Some(call);
            source
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture_one(&mut self) -> Result<RgbImage, SessionError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on == Some(call) {
                return Err(SessionError::Capture("injected failure".to_string()));
            }
            if !self.latency.is_zero() {
                thread::sleep(self.latency);
            }
            Ok(RgbImage::new(self.width, self.height))
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn short_session(target_fps: u32, millis: u64) -> CaptureSession {
        CaptureSession {
            kind: SourceKind::Screen,
            duration: Duration::from_millis(millis),
            target_fps,
        }
    }

    fn recording_progress() -> (ProgressCallback, Arc<Mutex<Vec<f32>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let callback: ProgressCallback =
            Box::new(move |p| sink.lock().unwrap().push(p));
        (callback, reports)
    }

    #[test]
    fn test_session_validates_duration_and_rate() {
        assert!(CaptureSession::new(SourceKind::Camera, 4, 15).is_err());
        assert!(CaptureSession::new(SourceKind::Camera, 61, 15).is_err());
        assert!(CaptureSession::new(SourceKind::Camera, 10, 0).is_err());

        let session = CaptureSession::new(SourceKind::Camera, 10, 15).unwrap();
        assert_eq!(session.duration, Duration::from_secs(10));
    }

    #[test]
    fn test_pacer_holds_target_rate_with_fast_source() {
        // 5ms captures against a 50ms budget leave plenty of sleep room.
        let mut source = ScriptedSource::new(Duration::from_millis(5));
        let session = short_session(20, 500);

        let sequence = capture_frames(&mut source, &session, None).unwrap();

        assert!(
            (7..=11).contains(&sequence.len()),
            "expected ~10 frames, got {}",
            sequence.len()
        );
        let effective = sequence.effective_fps();
        assert!(
            (14.0..=22.0).contains(&effective),
            "effective rate {effective} strayed from target 20"
        );
    }

    #[test]
    fn test_slow_source_degrades_rate_without_stretching_duration() {
        // 30ms captures blow the 10ms budget: the sleep clamps to zero and
        // the loop still terminates on the wall clock.
        let mut source = ScriptedSource::new(Duration::from_millis(30));
        let session = short_session(100, 300);

        let sequence = capture_frames(&mut source, &session, None).unwrap();

        let effective = sequence.effective_fps();
        assert!(
            effective < 50.0,
            "effective rate {effective} should fall well below the 100 fps target"
        );
        let elapsed = sequence.elapsed();
        assert!(
            elapsed >= Duration::from_millis(300) && elapsed <= Duration::from_millis(450),
            "elapsed {elapsed:?} should track the requested duration"
        );
    }

    #[test]
    fn test_effective_rate_derives_from_actual_count_and_elapsed() {
        let mut source = ScriptedSource::new(Duration::from_millis(2));
        let session = short_session(30, 400);

        let sequence = capture_frames(&mut source, &session, None).unwrap();

        let expected = sequence.len() as f64 / sequence.elapsed().as_secs_f64();
        assert!((sequence.effective_fps() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_offsets_are_monotonic() {
        let mut source = ScriptedSource::new(Duration::from_millis(2));
        let session = short_session(50, 200);

        let sequence = capture_frames(&mut source, &session, None).unwrap();

        assert_eq!(sequence.offsets().len(), sequence.len());
        for pair in sequence.offsets().windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_progress_is_monotonic_and_finishes_at_one() {
        let mut source = ScriptedSource::new(Duration::from_millis(2));
        let session = short_session(25, 300);
        let (callback, reports) = recording_progress();

        capture_frames(&mut source, &session, Some(&callback)).unwrap();

        let reports = reports.lock().unwrap();
        assert!(!reports.is_empty());
        for pair in reports.windows(2) {
            assert!(pair[0] <= pair[1], "progress went backwards: {pair:?}");
        }
        assert!(reports.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(*reports.last().unwrap(), 1.0);
    }

    #[test]
    fn test_immediate_failure_yields_empty_result_and_single_close() {
        let mut source = ScriptedSource::failing_on(Duration::ZERO, 0);
        let session = short_session(15, 200);
        let (callback, reports) = recording_progress();
        let output_dir = tempfile::tempdir().unwrap();

        let outcome = run_with_source(
            &mut source,
            &session,
            output_dir.path(),
            Some(&callback),
        )
        .unwrap();

        assert!(outcome.is_none());
        assert_eq!(source.closes, 1);
        assert!(
            reports.lock().unwrap().is_empty(),
            "no progress may be reported on the empty path"
        );
        // No artifact and no capture directory either.
        assert!(std::fs::read_dir(output_dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_mid_session_failure_aborts_and_releases_source() {
        let mut source = ScriptedSource::failing_on(Duration::from_millis(2), 3);
        let session = short_session(50, 400);
        let output_dir = tempfile::tempdir().unwrap();

        let outcome = run_with_source(&mut source, &session, output_dir.path(), None);

        assert!(matches!(outcome, Err(SessionError::Capture(_))));
        assert_eq!(source.closes, 1);
    }

    #[test]
    fn test_sequence_rejects_geometry_change() {
        let mut sequence = FrameSequence::new();
        sequence
            .push(RgbImage::new(8, 8), Duration::from_millis(1))
            .unwrap();
        let mismatch = sequence.push(RgbImage::new(16, 8), Duration::from_millis(2));
        assert!(matches!(mismatch, Err(SessionError::Capture(_))));
    }
}
