//! Error handling for the PPE edge controller

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Camera source could not be opened or failed its test read
    #[error("Connection error for camera {camera_id}: {message}")]
    Connection { camera_id: String, message: String },

    /// Frame read failure on an open source
    #[error("Source error: {0}")]
    Source(String),

    /// Detection backend failure (never escapes the detector boundary)
    #[error("Detection error: {0}")]
    Detection(String),

    /// Alert upload failure
    #[error("Alert delivery error: {0}")]
    AlertDelivery(String),

    /// Session control backend failure
    #[error("Session error: {0}")]
    Session(String),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a connection error for a camera
    pub fn connection(camera_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            camera_id: camera_id.into(),
            message: message.into(),
        }
    }
}
