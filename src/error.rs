//! Error types
//!
//! Library-level errors. The binary wraps these in `anyhow` at the edges.

use thiserror::Error;

/// Marker returned by cancellable operations when the run's token fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Failure of a single remote call.
///
/// `Clone` so a memoized failure can be handed to every caller that was
/// coalesced onto the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("API request failed: {status}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("call exceeded deadline of {0:?}")]
    Timeout(std::time::Duration),

    #[error("call cancelled")]
    Cancelled,
}

impl From<Cancelled> for ApiError {
    fn from(_: Cancelled) -> Self {
        ApiError::Cancelled
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Failure to answer "is this service deployed in this region?"
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("service {0} is not present in the service map")]
    UnknownService(String),

    #[error("failed to load service map: {0}")]
    Load(String),
}

/// Terminal failure of one region's unit of work.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("[{region}] {source}")]
    Fetch {
        region: String,
        #[source]
        source: ApiError,
    },

    #[error("[{region}] failed to transform response: {message}")]
    Transform { region: String, message: String },

    #[error("[{region}] worker panicked")]
    WorkerPanic { region: String },
}

impl ScanError {
    pub fn fetch(region: &str, source: ApiError) -> Self {
        ScanError::Fetch {
            region: region.to_string(),
            source,
        }
    }

    pub fn transform(region: &str, message: impl std::fmt::Display) -> Self {
        ScanError::Transform {
            region: region.to_string(),
            message: message.to_string(),
        }
    }

    /// Region this error belongs to
    pub fn region(&self) -> &str {
        match self {
            ScanError::Fetch { region, .. }
            | ScanError::Transform { region, .. }
            | ScanError::WorkerPanic { region } => region,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ScanError::Fetch {
                source: ApiError::Cancelled,
                ..
            }
        )
    }
}
