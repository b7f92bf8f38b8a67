//! src/services/stream_service.rs
//!
//! StreamService is the shared state behind every handler. It owns the
//! upstream connection pool, the per-connection stream adapters and the
//! reverse-proxy fallback, and turns an [`ObjectReference`] into verified
//! metadata plus a lazily pulled body.

use crate::{
    models::{
        object::{ObjectMetadata, ObjectReference},
        range::{ByteInterval, RangeError},
    },
    services::{
        planner::{chunk_size, plan},
        pool::{AdapterCache, ConnectionPool, LoadGuard},
        proxy::ProxyFallback,
        resolver,
        streamer::ByteStreamer,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("watch path `{0}` does not name an object")]
    InvalidWatchPath(String),
    #[error("object {0} not found")]
    NotFound(i64),
    #[error("fingerprint `{fingerprint}` does not match object {object_id}")]
    InvalidFingerprint { object_id: i64, fingerprint: String },
    #[error("malformed Range header `{0}`")]
    MalformedRange(String),
    #[error("range {from}-{until} not satisfiable for object of {size} bytes")]
    InvalidRange { from: u64, until: u64, size: u64 },
    #[error("upstream transient failure: {0}")]
    TransientUpstream(String),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("upstream returned {received} bytes at offset {offset}, expected {expected}")]
    UpstreamExhausted {
        offset: u64,
        expected: usize,
        received: usize,
    },
    #[error("no upstream connections available")]
    NoUpstream,
}

impl StreamError {
    /// Whether a failure before the response is committed should be answered by
    /// the reverse proxy instead of an error status.
    ///
    /// Fingerprint mismatches, missing objects and watch requests are final;
    /// connection-level failures mean the request was probably never ours.
    pub fn falls_back(&self) -> bool {
        matches!(
            self,
            StreamError::TransientUpstream(_)
                | StreamError::Timeout(_)
                | StreamError::NoUpstream
        )
    }
}

impl From<RangeError> for StreamError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::Malformed(raw) => StreamError::MalformedRange(raw),
            RangeError::Unsatisfiable { from, until, size } => {
                StreamError::InvalidRange { from, until, size }
            }
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Timeouts and addresses the service needs at request time.
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub resolve_timeout: Duration,
    pub chunk_timeout: Duration,
    /// Public base URL used for links embedded in watch pages; ends with `/`.
    pub public_url: String,
}

/// An object whose fingerprint has been checked, still holding its connection.
pub struct ResolvedObject {
    pub reference: ObjectReference,
    pub meta: ObjectMetadata,
    guard: LoadGuard,
    streamer: Arc<ByteStreamer>,
}

impl ResolvedObject {
    pub fn connection(&self) -> usize {
        self.guard.index()
    }

    /// Lazily pull exactly `interval` of the object. The connection's load is
    /// held until the returned stream is dropped.
    pub fn into_body(
        self,
        interval: ByteInterval,
    ) -> impl Stream<Item = StreamResult<Bytes>> + Send + use<> {
        let size = chunk_size(interval.len());
        let plan = plan(interval, size);
        debug!(
            object_id = self.reference.object_id,
            from = interval.from,
            until = interval.until,
            aligned_offset = plan.aligned_offset,
            first_chunk_trim = plan.first_chunk_trim,
            last_chunk_trim = plan.last_chunk_trim,
            chunk_count = plan.chunk_count,
            chunk_size = plan.chunk_size,
            "pull plan"
        );
        self.streamer
            .yield_file(self.reference.object_id, plan, self.guard)
    }
}

#[derive(Clone)]
pub struct StreamService {
    pub pool: Arc<ConnectionPool>,
    pub adapters: Arc<AdapterCache>,
    pub fallback: Arc<dyn ProxyFallback>,
    pub settings: ServiceSettings,
    pub started_at: DateTime<Utc>,
}

impl StreamService {
    pub fn new(
        pool: ConnectionPool,
        fallback: Arc<dyn ProxyFallback>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            pool: Arc::new(pool),
            adapters: Arc::new(AdapterCache::new(settings.chunk_timeout)),
            fallback,
            settings,
            started_at: Utc::now(),
        }
    }

    /// Resolve and verify `reference` on the least-loaded connection.
    ///
    /// The selected connection stays charged for as long as the returned
    /// object (or the body built from it) is alive.
    pub async fn open(&self, reference: &ObjectReference) -> StreamResult<ResolvedObject> {
        let guard = self.pool.acquire().ok_or(StreamError::NoUpstream)?;
        let streamer = self.adapters.adapter_for(guard.handle());
        info!(
            object_id = reference.object_id,
            connection = guard.index(),
            "connection serving request"
        );

        let meta = resolver::resolve(
            streamer.connection().client.as_ref(),
            reference.object_id,
            self.settings.resolve_timeout,
        )
        .await?;
        resolver::verify(&meta, reference)?;

        Ok(ResolvedObject {
            reference: reference.clone(),
            meta,
            guard,
            streamer,
        })
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Direct stream link for an object, as embedded in watch pages.
    pub fn stream_url(&self, reference: &ObjectReference) -> String {
        format!(
            "{}{}{}",
            self.settings.public_url, reference.fingerprint, reference.object_id
        )
    }
}
