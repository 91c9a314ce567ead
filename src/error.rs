//! Error handling for dataset generation and record packaging

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, ImageinaryError>;

/// Main error type for imageinary operations
#[derive(Error, Debug)]
pub enum ImageinaryError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Image encoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Source directory for record creation does not exist
    #[error("Source directory {} does not exist, please specify an input directory which contains valid images", .0.display())]
    MissingSourceDirectory(PathBuf),

    /// The requested record backend was not compiled in
    #[error("{backend} support is not available, rebuild with `--features {feature}`")]
    BackendUnavailable {
        backend: &'static str,
        feature: &'static str,
    },

    /// A file name carries no numeric image index
    #[error("Malformed file name {0:?}: no image index digits found")]
    MalformedFilename(String),

    /// A record container could not be decoded
    #[error("Corrupt record in {}: {reason}", path.display())]
    CorruptRecord {
        path: PathBuf,
        reason: String,
    },

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ImageinaryError {
    /// Create an error with additional context
    pub fn with_context<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a corrupt record error
    pub fn corrupt_record(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was raised before any output was attempted
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::MissingSourceDirectory(_) | Self::BackendUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_message_names_feature() {
        let err = ImageinaryError::BackendUnavailable {
            backend: "RecordIO",
            feature: "recordio",
        };
        let msg = err.to_string();
        assert!(msg.contains("RecordIO"));
        assert!(msg.contains("--features recordio"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_io_error_is_not_config_error() {
        let err: ImageinaryError = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert!(!err.is_config_error());
        assert!(err.to_string().contains("disk full"));
    }
}
