//! Error handling for camhub

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown camera or task id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller roles do not intersect the camera's allowed roles
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Device or stream failure; a later hook may retry
    #[error("Capture failure for camera {camera_id}: {message}")]
    CaptureFailure { camera_id: String, message: String },

    /// Malformed MJPEG framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration or persisted task
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a capture failure for a camera
    pub fn capture(camera_id: &str, message: impl Into<String>) -> Self {
        Error::CaptureFailure {
            camera_id: camera_id.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable code, used in logs and notifications
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::CaptureFailure { .. } => "CAPTURE_FAILURE",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Image(_) => "IMAGE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
