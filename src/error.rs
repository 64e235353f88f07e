// =============================================================================
// Error taxonomy for the trading platform
// =============================================================================
//
// Variants map to distinct handling policies:
//   Config        — fatal for the command that hit it; abort.
//   Validation    — risk-check failure; surfaced to the caller, logged, no
//                   state mutation.
//   TransientIo   — network/broker/DB hiccup; retried with capped backoff
//                   before a stage is marked failed.
//   DataGap       — no bars / no sentiment / no quote. Not a failure:
//                   callers degrade or abort the cycle without error state.
//   FatalInvariant — impossible decision values (negative quantity,
//                   fractional equity quantity). Abort the cycle, never retry.
//   Store         — SQLite-level error surfaced from the persistence layer.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeridianError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("data gap: {0}")]
    DataGap(String),

    #[error("invariant violated: {0}")]
    FatalInvariant(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl MeridianError {
    /// Whether a bounded retry is worthwhile for this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

impl From<reqwest::Error> for MeridianError {
    fn from(e: reqwest::Error) -> Self {
        Self::TransientIo(e.to_string())
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(format!("JSON parse error: {e}"))
    }
}

impl From<std::io::Error> for MeridianError {
    fn from(e: std::io::Error) -> Self {
        Self::TransientIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeridianError>;
