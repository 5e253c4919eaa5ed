/*!
 * Request Strategy contract
 *
 * The Controller and Upload Queue are transport-agnostic; all network
 * behavior is expressed through this trait. One bundled implementation
 * (`http::HttpRequestStrategy`) is provided in [`http`]; tests substitute an
 * in-memory mock rather than exercising a real network.
 */

pub mod http;
pub mod url;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ChunkDescriptor, FileMeta};

/// A chunk's index and digest, as sent in the merge request.
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub index: u64,
    pub hash: String,
}

/// Opaque result of a successful merge — typically a download URL.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub locator: String,
}

/// Transport contract consumed by the Controller. Implementors decide how
/// session creation, dedup checks, chunk upload, and merge are carried over
/// the wire; the core only depends on this trait.
#[async_trait]
pub trait RequestStrategy: Send + Sync {
    /// Create an upload session for `meta`, returning a server-issued token.
    async fn create_session(&self, meta: &FileMeta, chunk_count: u64) -> Result<String>;

    /// Ask whether a chunk with this digest already exists for `token`.
    async fn check_chunk(&self, token: &str, digest: &str) -> Result<bool>;

    /// Ask whether the whole file with this digest already exists for `token`.
    async fn check_file(&self, token: &str, digest: &str) -> Result<bool>;

    /// Upload one chunk's bytes and digest.
    async fn upload_chunk(&self, token: &str, chunk: &ChunkDescriptor) -> Result<()>;

    /// Instruct the server to assemble the file from previously uploaded
    /// chunks, ordered by index.
    async fn merge_file(
        &self,
        token: &str,
        file_hash: &str,
        file_name: &str,
        chunks: &[ChunkRef],
    ) -> Result<MergeResult>;
}
