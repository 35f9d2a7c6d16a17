//! Error taxonomy for picket-fence analysis.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PicketFenceError>;

/// Fatal analysis errors.
///
/// Per-leaf sampling failures are not errors: they are recorded as omissions
/// on the owning picket and only surface here when no picket survives.
#[derive(Debug, Error)]
pub enum PicketFenceError {
    /// Invalid MLC arrangement or analysis parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Empty or degenerate input array, or invalid pixel spacing.
    #[error("image load error: {0}")]
    ImageLoad(String),

    /// No pickets found, requested count unmatched, or every picket dropped.
    #[error("picket detection error: {0}")]
    PicketDetection(String),

    /// Reading a configuration or arrangement file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing a configuration or arrangement file failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PicketFenceError {
    pub(crate) fn configuration(details: impl Into<String>) -> Self {
        Self::Configuration(details.into())
    }

    pub(crate) fn image_load(details: impl Into<String>) -> Self {
        Self::ImageLoad(details.into())
    }

    pub(crate) fn picket_detection(details: impl Into<String>) -> Self {
        Self::PicketDetection(details.into())
    }
}
