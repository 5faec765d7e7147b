//! Error types for the tool routing core.

/// Top-level error type for the tool router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Submission named a tool that is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RouterError>;
