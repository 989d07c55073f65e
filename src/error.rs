//! Error types for the aide shell runtime.

/// Top-level error type for the shell runtime.
///
/// The first four variants mirror the failure classes the core knows how to
/// absorb: every one of them is converted into displayed state plus a
/// [`ShellEvent`](crate::runtime::ShellEvent) at the call site.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Poll or dismiss call failed; prior state is kept.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Capture device unavailable or access denied.
    #[error("audio device error: {0}")]
    Device(String),

    /// Encoding, upload or transcription failed.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A turn was submitted while another one is still awaiting its reply.
    #[error("input is locked while a reply is pending")]
    InputLocked,

    /// Transport-level gateway failure (connect, status, decode).
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Host envelope or payload did not match the contract.
    #[error("contract error: {0}")]
    Contract(String),
}

impl From<reqwest::Error> for ShellError {
    fn from(e: reqwest::Error) -> Self {
        Self::Gateway(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ShellError>;
