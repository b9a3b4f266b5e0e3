//! Error types for the live stream player

/// Result type alias for live playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving or launching the live stream
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resolver ran but did not yield a playable URL
    #[error("Stream resolution failed: {0}")]
    ResolutionFailed(String),

    /// The resolver process could not be started
    #[error("Cannot run stream resolver: {0}")]
    ResolverSpawn(#[source] std::io::Error),

    /// The resolution was superseded or cancelled before it completed
    #[error("Stream fetch cancelled")]
    FetchCancelled,

    /// The media player process could not be started
    #[error("Cannot launch player '{program}': {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The player has been destroyed
    #[error("Stream player destroyed")]
    Destroyed,

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl Error {
    /// Create a resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::ResolutionFailed(msg.into())
    }

    /// Returns true for errors produced by a superseded operation.
    ///
    /// Such errors are expected during `stop()` or re-entrant `play()` and are
    /// not reported to the user.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::FetchCancelled)
    }
}
