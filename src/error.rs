use std::io;

/// Errors a capture session can surface.
///
/// Zero captured frames is not an error; the orchestrator reports it as an
/// explicit empty result instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("analysis request failed: {0}")]
    Analyze(String),

    #[error("invalid session: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
