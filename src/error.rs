/*!
 * Error types for the upload engine
 */

pub type Result<T> = std::result::Result<T, UploadError>;

/// Errors surfaced to the caller of [`crate::Controller`].
///
/// Each variant corresponds to one of the five failure kinds the pipeline
/// can terminate with. None of them are retried internally — the caller
/// restarts with a new `Controller` if it wants another attempt.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Session creation with the server failed, or the response carried no token.
    #[error("session creation failed: {message}")]
    Session { message: String },

    /// A dedup check (`checkChunk`/`checkFile`) failed.
    #[error("network error during dedup check: {message}")]
    Network { message: String },

    /// A chunk upload failed, either at the transport level or because the
    /// server rejected it logically (non-200 `code`).
    #[error("chunk {index} upload failed: {message}")]
    Upload { index: u64, message: String },

    /// The final merge call failed after all chunks were uploaded.
    #[error("merge failed: {message}")]
    Merge { message: String },

    /// A hashing worker failed to digest a chunk.
    #[error("hashing failed for chunk {index}: {message}")]
    Hash { index: u64, message: String },

    /// Configuration was invalid (e.g. zero chunk size).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O failure reading the source file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn upload(index: u64, message: impl Into<String>) -> Self {
        Self::Upload {
            index,
            message: message.into(),
        }
    }

    pub fn merge(message: impl Into<String>) -> Self {
        Self::Merge {
            message: message.into(),
        }
    }

    pub fn hash(index: u64, message: impl Into<String>) -> Self {
        Self::Hash {
            index,
            message: message.into(),
        }
    }

    /// Category name, used for log fields and test assertions.
    pub fn category(&self) -> &'static str {
        match self {
            UploadError::Session { .. } => "session",
            UploadError::Network { .. } => "network",
            UploadError::Upload { .. } => "upload",
            UploadError::Merge { .. } => "merge",
            UploadError::Hash { .. } => "hash",
            UploadError::Config(_) => "config",
            UploadError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories() {
        assert_eq!(UploadError::session("x").category(), "session");
        assert_eq!(UploadError::network("x").category(), "network");
        assert_eq!(UploadError::upload(2, "x").category(), "upload");
        assert_eq!(UploadError::merge("x").category(), "merge");
        assert_eq!(UploadError::hash(1, "x").category(), "hash");
    }

    #[test]
    fn upload_error_display_includes_index() {
        let err = UploadError::upload(3, "boom");
        assert!(err.to_string().contains('3'));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let upload_err: UploadError = io_err.into();
        assert!(matches!(upload_err, UploadError::Io(_)));
    }
}
