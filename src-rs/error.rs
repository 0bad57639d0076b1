//! Error types for garment segmentation

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or mutating annotations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnnotationError {
    #[error("no points and no box to send for a mask request")]
    Empty,

    #[error("point index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("annotations are frozen while a mask request is in flight")]
    Frozen,

    #[error("viewport width must be positive, got {0}")]
    InvalidViewport(f64),

    #[error("failed to encode annotation JSON: {0}")]
    Encode(String),
}

/// Errors raised while fetching a mask from the inference server.
#[derive(Error, Debug)]
pub enum MaskFetchError {
    #[error("mask request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("malformed mask response: {0}")]
    MalformedResponse(String),
}

impl MaskFetchError {
    /// True for connection, timeout and non-success status failures.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::MalformedResponse(_))
    }
}

/// Errors raised while decoding or re-encoding the captured photo.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("failed to encode working image as JPEG: {0}")]
    Encode(String),

    #[error("invalid EXIF orientation tag {0}")]
    Orientation(u32),
}

/// Errors raised by the crop stage. A failed crop can be retried without re-fetching.
#[derive(Error, Debug)]
pub enum CropError {
    #[error("no mask available to crop with")]
    NoMask,

    #[error("failed to decode captured image: {0}")]
    Decode(String),

    #[error("mask resize failed: {0}")]
    Resize(String),

    #[error("mask composite failed: {0}")]
    Composite(String),
}

/// Configuration load/validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a segmentation session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no photo captured for this session")]
    NoImage,

    #[error("a mask request is already in flight")]
    RequestInFlight,

    #[error("operation `{operation}` not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("session was reset while the request was in flight")]
    Discarded,

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Fetch(#[from] MaskFetchError),

    #[error(transparent)]
    Crop(#[from] CropError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
