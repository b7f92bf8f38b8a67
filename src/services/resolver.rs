//! Object resolver: metadata lookup and fingerprint verification.

use crate::{
    models::object::{ObjectMetadata, ObjectReference},
    services::{
        stream_service::StreamError,
        upstream::{UpstreamClient, UpstreamError},
    },
};
use std::time::Duration;
use tokio::time::timeout;

/// Fetch fresh metadata for `object_id`, bounded by `limit`.
///
/// # Errors
/// - `StreamError::NotFound` when the backend has no such object
/// - `StreamError::TransientUpstream` / `StreamError::Timeout` otherwise
pub async fn resolve(
    client: &dyn UpstreamClient,
    object_id: i64,
    limit: Duration,
) -> Result<ObjectMetadata, StreamError> {
    match timeout(limit, client.fetch_metadata(object_id)).await {
        Ok(Ok(meta)) => Ok(meta),
        Ok(Err(UpstreamError::NotFound(id))) => Err(StreamError::NotFound(id)),
        Ok(Err(UpstreamError::Transient(msg))) => Err(StreamError::TransientUpstream(msg)),
        Err(_) => Err(StreamError::Timeout(limit)),
    }
}

/// Check the caller's fingerprint against the resolved metadata.
pub fn verify(meta: &ObjectMetadata, reference: &ObjectReference) -> Result<(), StreamError> {
    if meta.matches_fingerprint(&reference.fingerprint) {
        Ok(())
    } else {
        Err(StreamError::InvalidFingerprint {
            object_id: reference.object_id,
            fingerprint: reference.fingerprint.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upstream::mock::{Failure, MockUpstream};

    const LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn resolving_twice_is_idempotent() {
        let upstream = MockUpstream::new().with_object(5, "AgADxyZ9", 1024, "audio/mpeg");
        let first = resolve(&upstream, 5, LIMIT).await.unwrap();
        let second = resolve(&upstream, 5, LIMIT).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(upstream.metadata_calls(), 2);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let upstream = MockUpstream::new();
        assert!(matches!(
            resolve(&upstream, 5, LIMIT).await,
            Err(StreamError::NotFound(5))
        ));
    }

    #[tokio::test]
    async fn transient_failure_is_reported() {
        let upstream = MockUpstream::new().with_object(5, "AgADxyZ9", 1024, "audio/mpeg");
        upstream.fail_with(Failure::Metadata);
        assert!(matches!(
            resolve(&upstream, 5, LIMIT).await,
            Err(StreamError::TransientUpstream(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let upstream = MockUpstream::new().with_object(5, "AgADxyZ9", 1024, "audio/mpeg");
        upstream.fail_with(Failure::MetadataHang);
        let err = resolve(&upstream, 5, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, StreamError::Timeout(_)));
        assert!(err.falls_back());
    }

    #[test]
    fn verify_rejects_offset_substring() {
        let meta = ObjectMetadata {
            size_bytes: 1,
            mime_type: None,
            file_name: None,
            fingerprint: "AgADxyZ9".into(),
        };
        assert!(verify(&meta, &ObjectReference::new(1, "AgADxy")).is_ok());
        assert!(matches!(
            verify(&meta, &ObjectReference::new(1, "gADxyZ")),
            Err(StreamError::InvalidFingerprint { .. })
        ));
    }
}
