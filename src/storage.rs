//! Capture directory bookkeeping.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::capture::SourceKind;
use crate::error::SessionError;

pub const DEFAULT_CAPTURE_DIR: &str = "recorded_videos";

/// Reserve a timestamp-named artifact path under `dir`, creating the
/// directory if needed.
///
/// Back-to-back sessions inside the same second get a `-N` suffix so no
/// session ever overwrites another's artifact.
pub fn artifact_path(dir: &Path, kind: SourceKind) -> Result<PathBuf, SessionError> {
    fs::create_dir_all(dir)?;

    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let base = format!("{}_recording_{}", kind.as_str(), stamp);

    let mut path = dir.join(format!("{base}.mp4"));
    let mut attempt = 1u32;
    while path.exists() {
        path = dir.join(format!("{base}-{attempt}.mp4"));
        attempt += 1;
    }
    Ok(path)
}
