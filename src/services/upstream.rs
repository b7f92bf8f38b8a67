//! Connection to the messaging backend that holds object payloads.
//!
//! The relay only needs two capabilities from a backend connection: look up
//! an object's metadata, and pull one chunk of its bytes at an offset.

use crate::models::object::ObjectMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("object {0} not found upstream")]
    NotFound(i64),
    #[error("upstream transient failure: {0}")]
    Transient(String),
}

/// One authenticated backend connection.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch metadata for `object_id`.
    ///
    /// # Errors
    /// - `UpstreamError::NotFound` when the backend has no such object
    /// - `UpstreamError::Transient` for connection resets and protocol hiccups
    async fn fetch_metadata(&self, object_id: i64) -> Result<ObjectMetadata, UpstreamError>;

    /// Pull up to `limit` bytes of `object_id` starting at `offset`.
    ///
    /// A chunk shorter than `limit` is only expected at the end of the object.
    async fn pull_chunk(
        &self,
        object_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, UpstreamError>;
}

/// Metadata as the object gateway sends it.
#[derive(Debug, Deserialize)]
struct WireMetadata {
    file_size: Option<u64>,
    mime_type: Option<String>,
    file_name: Option<String>,
    unique_id: String,
}

impl From<WireMetadata> for ObjectMetadata {
    fn from(wire: WireMetadata) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            size_bytes: wire.file_size.unwrap_or(0),
            mime_type: non_empty(wire.mime_type),
            file_name: non_empty(wire.file_name),
            fingerprint: wire.unique_id,
        }
    }
}

/// Backend connection reached through an HTTP object gateway.
///
/// - `GET {base}/objects/{id}` returns JSON metadata
/// - `GET {base}/objects/{id}/content` with a `Range` header returns bytes
pub struct HttpUpstream {
    client: reqwest::Client,
    base: url::Url,
}

impl HttpUpstream {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let mut base = url::Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, base })
    }

    fn object_url(&self, object_id: i64, suffix: &str) -> Result<url::Url, UpstreamError> {
        self.base
            .join(&format!("objects/{object_id}{suffix}"))
            .map_err(|e| UpstreamError::Transient(format!("building upstream url: {e}")))
    }
}

fn transient(err: reqwest::Error) -> UpstreamError {
    UpstreamError::Transient(err.to_string())
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn fetch_metadata(&self, object_id: i64) -> Result<ObjectMetadata, UpstreamError> {
        let url = self.object_url(object_id, "")?;
        debug!(%url, "fetching object metadata");

        let response = self.client.get(url).send().await.map_err(transient)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(object_id)),
            status if status.is_success() => {
                let wire: WireMetadata = response.json().await.map_err(transient)?;
                Ok(wire.into())
            }
            status => Err(UpstreamError::Transient(format!(
                "metadata request returned {status}"
            ))),
        }
    }

    async fn pull_chunk(
        &self,
        object_id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, UpstreamError> {
        let url = self.object_url(object_id, "/content")?;
        let last = offset + limit.saturating_sub(1);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::RANGE, format!("bytes={offset}-{last}"))
            .send()
            .await
            .map_err(transient)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(object_id)),
            status if status.is_success() => {
                let content_range = response
                    .headers()
                    .get(reqwest::header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                check_chunk_start(status, content_range.as_deref(), offset)?;

                let body = response.bytes().await.map_err(transient)?;
                // a plain 200 is the whole object from byte 0
                let keep = body.len().min(usize::try_from(limit).unwrap_or(usize::MAX));
                Ok(body.slice(..keep))
            }
            status => Err(UpstreamError::Transient(format!(
                "chunk request at {offset} returned {status}"
            ))),
        }
    }
}

/// A chunk is usable only if it begins at `offset`: a `206` whose
/// `Content-Range` starts there, or a full `200` body when `offset` is 0.
fn check_chunk_start(
    status: StatusCode,
    content_range: Option<&str>,
    offset: u64,
) -> Result<(), UpstreamError> {
    match status {
        StatusCode::PARTIAL_CONTENT => {
            let start = content_range
                .and_then(|v| v.trim().strip_prefix("bytes "))
                .and_then(|v| v.split_once('-'))
                .and_then(|(start, _)| start.trim().parse::<u64>().ok());
            match start {
                Some(start) if start == offset => Ok(()),
                _ => Err(UpstreamError::Transient(format!(
                    "chunk at {offset} answered with Content-Range {content_range:?}"
                ))),
            }
        }
        StatusCode::OK if offset == 0 => Ok(()),
        status => Err(UpstreamError::Transient(format!(
            "chunk request at {offset} answered {status} without the requested range"
        ))),
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory backend used by tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Failure {
        /// `fetch_metadata` reports a transient error.
        Metadata,
        /// `fetch_metadata` never answers.
        MetadataHang,
        /// The n-th pull (0-based) fails.
        PullAt(usize),
        /// The n-th pull (0-based) never answers.
        PullHangAt(usize),
    }

    #[derive(Default)]
    pub struct MockUpstream {
        objects: Mutex<HashMap<i64, (ObjectMetadata, Bytes)>>,
        failure: Mutex<Option<Failure>>,
        pulls: AtomicUsize,
        metadata_calls: AtomicUsize,
    }

    impl MockUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register an object whose bytes are `i % 251` for `i` in `0..size`.
        pub fn with_object(self, object_id: i64, unique_id: &str, size: u64, mime: &str) -> Self {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let meta = ObjectMetadata {
                size_bytes: size,
                mime_type: Some(mime.to_string()),
                file_name: Some(format!("object-{object_id}.bin")),
                fingerprint: unique_id.to_string(),
            };
            self.objects
                .lock()
                .insert(object_id, (meta, Bytes::from(data)));
            self
        }

        pub fn fail_with(&self, failure: Failure) {
            *self.failure.lock() = Some(failure);
        }

        pub fn pulls(&self) -> usize {
            self.pulls.load(Ordering::SeqCst)
        }

        pub fn metadata_calls(&self) -> usize {
            self.metadata_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for MockUpstream {
        async fn fetch_metadata(&self, object_id: i64) -> Result<ObjectMetadata, UpstreamError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            let failure = *self.failure.lock();
            match failure {
                Some(Failure::Metadata) => {
                    return Err(UpstreamError::Transient("connection reset".into()));
                }
                Some(Failure::MetadataHang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                _ => {}
            }
            self.objects
                .lock()
                .get(&object_id)
                .map(|(meta, _)| meta.clone())
                .ok_or(UpstreamError::NotFound(object_id))
        }

        async fn pull_chunk(
            &self,
            object_id: i64,
            offset: u64,
            limit: u64,
        ) -> Result<Bytes, UpstreamError> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst);
            let failure = *self.failure.lock();
            if failure == Some(Failure::PullAt(n)) {
                return Err(UpstreamError::Transient("connection reset".into()));
            }
            if failure == Some(Failure::PullHangAt(n)) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let objects = self.objects.lock();
            let (_, data) = objects
                .get(&object_id)
                .ok_or(UpstreamError::NotFound(object_id))?;
            let start = (offset as usize).min(data.len());
            let end = (offset.saturating_add(limit) as usize).min(data.len());
            Ok(data.slice(start..end))
        }
    }
}
