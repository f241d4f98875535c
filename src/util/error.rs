//! Error types for the renderer.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for host-side renderer operations.
///
/// Device-boundary failures (buffer/pipeline creation, kernel dispatch) are
/// reported through sentinel handles and boolean returns instead, so a bad
/// frame never unwinds the session.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// No usable GPU adapter / device creation failed
    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),

    /// Kernel source failed to compile or validate
    #[error("Kernel compilation failed for '{name}': {message}")]
    KernelCompile { name: String, message: String },

    /// Integrator name not recognized by the factory
    #[error("Unknown integrator: {0}")]
    UnknownIntegrator(String),

    /// Render settings rejected (bad dimensions, bad option override, ...)
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Image encode/write failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Settings (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid settings error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::GpuUnavailable("no adapter".into());
        assert!(e.to_string().contains("no adapter"));

        let e = Error::KernelCompile {
            name: "trace".into(),
            message: "parse error".into(),
        };
        assert!(e.to_string().contains("trace"));
        assert!(e.to_string().contains("parse error"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
