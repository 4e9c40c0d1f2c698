use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the damage segmentation service.
///
/// Each variant carries the context of its domain (filesystem, decoding, model
/// runtime, request validation) so the HTTP layer can pick a status code and the
/// CLI can print a useful chain without parsing strings.
#[derive(Error, Debug)]
pub enum DamageSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (image: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Upload error: {field} {reason}")]
    Upload { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DamageSegError>;

impl DamageSegError {
    pub(crate) fn model(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// True for errors caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ImageProcessing { .. } | Self::Validation { .. } | Self::Upload { .. }
        )
    }
}

/// Dependencies returning `anyhow::Error` carry no structure; they are folded
/// into configuration errors at the boundary.
impl From<anyhow::Error> for DamageSegError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: format!("{err:#}"),
        }
    }
}

/// Fallback for I/O errors raised without path context. Callers that know the
/// path build `DamageSegError::FileSystem` themselves.
impl From<std::io::Error> for DamageSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for DamageSegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for DamageSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors only come out of tensor handling around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for DamageSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        let upload = DamageSegError::Upload {
            field: "pre_image".to_string(),
            reason: "is missing".to_string(),
        };
        assert!(upload.is_client_error());
        assert_eq!(upload.to_string(), "Upload error: pre_image is missing");

        let model = DamageSegError::model(
            "inference",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert!(!model.is_client_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: DamageSegError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, DamageSegError::FileSystem { .. }));
    }
}
