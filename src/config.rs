/*!
 * Configuration structures and defaults for the upload engine
 */

use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default number of simultaneously in-flight network operations.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Configuration for a single upload run: chunk size, upload concurrency
/// cap, hashing worker count, and the base URL used by the bundled HTTP
/// transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Size of each chunk in bytes. Every chunk except possibly the last is
    /// exactly this size.
    pub chunk_size: usize,

    /// Maximum number of simultaneously in-flight upload/dedup network
    /// operations.
    pub concurrency: usize,

    /// Number of hashing worker threads. `None` means auto-detect from the
    /// platform's hardware-parallelism hint, falling back to 4.
    pub worker_count: Option<usize>,

    /// Base URL for the bundled HTTP transport.
    pub base_url: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            worker_count: None,
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl UploadConfig {
    /// Validate the configuration, returning a `Config` error describing the
    /// first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::Config("chunk_size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::Config("concurrency must be positive".into()));
        }
        if let Some(0) = self.worker_count {
            return Err(UploadError::Config(
                "worker_count must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the effective hashing worker count: the configured value, or
    /// the platform's hardware-parallelism hint, or 4 if detection fails.
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Load configuration from a JSON file, falling back to defaults if the
    /// file does not exist or fails to parse.
    pub fn load_with_fallback(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}
