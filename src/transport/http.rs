/*!
 * Bundled HTTP Request Strategy
 *
 * A `reqwest`-based implementation of [`super::RequestStrategy`] matching the
 * wire formats: JSON session/dedup/merge calls, multipart chunk upload.
 * Per-request timeouts are left to the caller's `reqwest::Client`
 * configuration rather than hardcoded here.
 */

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};
use crate::model::{ChunkDescriptor, FileMeta};

use super::{ChunkRef, MergeResult, RequestStrategy};

pub struct HttpRequestStrategy {
    client: Client,
    base_url: String,
}

impl HttpRequestStrategy {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct SessionCreateRequest<'a> {
    #[serde(rename = "fileName")]
    file_name: &'a str,
    #[serde(rename = "fileType")]
    file_type: &'a str,
    #[serde(rename = "fileSize")]
    file_size: u64,
    #[serde(rename = "chunkCount")]
    chunk_count: u64,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    code: u32,
    token: Option<String>,
}

#[derive(Serialize)]
struct HashCheckRequest<'a> {
    token: &'a str,
    hash: &'a str,
    #[serde(rename = "isChunk")]
    is_chunk: bool,
}

#[derive(Deserialize)]
struct HashCheckResponse {
    code: u32,
    exists: Option<bool>,
}

#[derive(Deserialize)]
struct ChunkUploadResponse {
    code: u32,
}

#[derive(Serialize)]
struct MergeChunkRef<'a> {
    index: u64,
    hash: &'a str,
}

#[derive(Serialize)]
struct MergeRequest<'a> {
    token: &'a str,
    #[serde(rename = "fileHash")]
    file_hash: &'a str,
    #[serde(rename = "fileName")]
    file_name: &'a str,
    #[serde(rename = "chunksLength")]
    chunks_length: u64,
    chunks: Vec<MergeChunkRef<'a>>,
}

#[derive(Deserialize)]
struct MergeResponse {
    code: u32,
    url: Option<String>,
}

#[async_trait]
impl RequestStrategy for HttpRequestStrategy {
    async fn create_session(&self, meta: &FileMeta, chunk_count: u64) -> Result<String> {
        let body = SessionCreateRequest {
            file_name: &meta.file_name,
            file_type: &meta.file_type,
            file_size: meta.file_size,
            chunk_count,
        };

        let response: SessionCreateResponse = self
            .client
            .post(self.url("/session"))
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::session(e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::session(e.to_string()))?;

        if response.code != 200 {
            return Err(UploadError::session(format!(
                "server returned code {}",
                response.code
            )));
        }

        response
            .token
            .ok_or_else(|| UploadError::session("response carried no token"))
    }

    async fn check_chunk(&self, token: &str, digest: &str) -> Result<bool> {
        self.check_hash(token, digest, true).await
    }

    async fn check_file(&self, token: &str, digest: &str) -> Result<bool> {
        self.check_hash(token, digest, false).await
    }

    async fn upload_chunk(&self, token: &str, chunk: &ChunkDescriptor) -> Result<()> {
        let digest = chunk
            .hash
            .clone()
            .ok_or_else(|| UploadError::upload(chunk.index, "chunk has no digest"))?;
        let bytes = chunk
            .read_bytes()
            .map_err(|e| UploadError::upload(chunk.index, e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("token", token.to_string())
            .text("hash", digest)
            .part("chunk", reqwest::multipart::Part::bytes(bytes));

        let response: ChunkUploadResponse = self
            .client
            .post(self.url("/chunk"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::upload(chunk.index, e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::upload(chunk.index, e.to_string()))?;

        if response.code != 200 {
            return Err(UploadError::upload(
                chunk.index,
                format!("server returned code {}", response.code),
            ));
        }

        Ok(())
    }

    async fn merge_file(
        &self,
        token: &str,
        file_hash: &str,
        file_name: &str,
        chunks: &[ChunkRef],
    ) -> Result<MergeResult> {
        let body = MergeRequest {
            token,
            file_hash,
            file_name,
            chunks_length: chunks.len() as u64,
            chunks: chunks
                .iter()
                .map(|c| MergeChunkRef {
                    index: c.index,
                    hash: &c.hash,
                })
                .collect(),
        };

        let response: MergeResponse = self
            .client
            .post(self.url("/merge"))
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::merge(e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::merge(e.to_string()))?;

        if response.code != 200 {
            return Err(UploadError::merge(format!(
                "server returned code {}",
                response.code
            )));
        }

        response
            .url
            .map(|locator| MergeResult { locator })
            .ok_or_else(|| UploadError::merge("response carried no url"))
    }
}

impl HttpRequestStrategy {
    /// A non-200 `code` is a logical failure even over HTTP 200, the same
    /// way the other three endpoints treat it — collapsing it into `Ok(false)`
    /// would make a genuine dedup-check failure look like "not found" and
    /// send the queue on to upload a chunk (or merge a file) the server
    /// never actually confirmed as absent.
    async fn check_hash(&self, token: &str, digest: &str, is_chunk: bool) -> Result<bool> {
        let body = HashCheckRequest {
            token,
            hash: digest,
            is_chunk,
        };

        let response: HashCheckResponse = self
            .client
            .post(self.url("/hash"))
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::network(e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::network(e.to_string()))?;

        if response.code != 200 {
            return Err(UploadError::network(format!(
                "server returned code {}",
                response.code
            )));
        }

        Ok(response.exists.unwrap_or(false))
    }
}
