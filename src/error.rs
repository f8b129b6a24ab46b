//! Error types for sketch-diffusion.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid schedule configuration (unknown curve or variance policy,
    /// out-of-range scalars). Raised at construction time.
    #[error("config: {0}")]
    Config(String),

    /// A reverse step would take the square root of a negative number.
    #[error("numeric domain: {0}")]
    NumericDomain(String),

    /// Caller contract violation: out-of-range timesteps, guidance
    /// against a model without guidance support, bad step counts.
    #[error("precondition: {0}")]
    Precondition(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
