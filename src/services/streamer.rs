//! Chunked stream producer.
//!
//! Turns a [`PullPlan`] into a lazy, single-pass stream of trimmed chunks. A
//! chunk is only requested from the backend once the response writer polls for
//! it, so at most one chunk per request is in memory.

use crate::services::{
    planner::PullPlan,
    pool::{ConnectionHandle, LoadGuard},
    stream_service::StreamError,
    upstream::UpstreamError,
};
use bytes::Bytes;
use futures::{Stream, stream};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, error};

/// Stream adapter bound to one pooled connection.
pub struct ByteStreamer {
    handle: Arc<ConnectionHandle>,
    chunk_timeout: Duration,
}

struct PullState {
    streamer: Arc<ByteStreamer>,
    object_id: i64,
    plan: PullPlan,
    part: u64,
    finished: bool,
    // released when the body finishes, fails, or is dropped on disconnect
    _guard: LoadGuard,
}

impl ByteStreamer {
    pub fn new(handle: Arc<ConnectionHandle>, chunk_timeout: Duration) -> Self {
        Self {
            handle,
            chunk_timeout,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Produce the planned chunks for `object_id`, in ascending offset order.
    ///
    /// The load `guard` travels with the stream. A failed or timed-out pull
    /// yields one error and ends the stream; nothing is retried.
    pub fn yield_file(
        self: &Arc<Self>,
        object_id: i64,
        plan: PullPlan,
        guard: LoadGuard,
    ) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + use<> {
        let state = PullState {
            streamer: Arc::clone(self),
            object_id,
            plan,
            part: 0,
            finished: false,
            _guard: guard,
        };

        stream::unfold(state, |mut state| async move {
            if state.finished || state.part >= state.plan.chunk_count {
                return None;
            }

            let item = state.next_chunk().await;
            match &item {
                Ok(_) => state.part += 1,
                Err(err) => {
                    error!(
                        object_id = state.object_id,
                        connection = state.streamer.handle.index,
                        part = state.part,
                        chunk_count = state.plan.chunk_count,
                        error = %err,
                        "stream aborted"
                    );
                    state.finished = true;
                }
            }
            Some((item, state))
        })
    }
}

impl PullState {
    async fn next_chunk(&self) -> Result<Bytes, StreamError> {
        let offset = self.plan.offset_of(self.part);
        let pull = self.streamer.handle.client.pull_chunk(
            self.object_id,
            offset,
            self.plan.chunk_size,
        );

        let chunk = match timeout(self.streamer.chunk_timeout, pull).await {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(UpstreamError::NotFound(id))) => return Err(StreamError::NotFound(id)),
            Ok(Err(UpstreamError::Transient(msg))) => {
                return Err(StreamError::TransientUpstream(msg));
            }
            Err(_) => return Err(StreamError::Timeout(self.streamer.chunk_timeout)),
        };

        let (start, end) = self.plan.keep_range(self.part);
        if chunk.len() < end {
            return Err(StreamError::UpstreamExhausted {
                offset,
                expected: end,
                received: chunk.len(),
            });
        }

        debug!(
            object_id = self.object_id,
            part = self.part,
            offset,
            kept = end - start,
            "chunk pulled"
        );
        Ok(chunk.slice(start..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::range::ByteInterval,
        services::{
            planner::plan,
            pool::ConnectionPool,
            upstream::{
                UpstreamClient,
                mock::{Failure, MockUpstream},
            },
        },
    };
    use futures::StreamExt;

    const SIZE: u64 = 20_000;

    fn setup() -> (Arc<MockUpstream>, ConnectionPool) {
        let upstream = Arc::new(MockUpstream::new().with_object(7, "AgADxyZ9", SIZE, "video/mp4"));
        let pool = ConnectionPool::new(vec![Arc::clone(&upstream) as Arc<dyn UpstreamClient>]);
        (upstream, pool)
    }

    fn streamer_for(guard: &LoadGuard) -> Arc<ByteStreamer> {
        Arc::new(ByteStreamer::new(
            Arc::clone(guard.handle()),
            Duration::from_secs(5),
        ))
    }

    fn expected(from: u64, until: u64) -> Vec<u8> {
        (from..=until).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn streams_exact_interval_in_order() {
        let (upstream, pool) = setup();
        let guard = pool.acquire().unwrap();
        let streamer = streamer_for(&guard);
        let p = plan(ByteInterval { from: 1000, until: 13_000 }, 4096);

        let chunks: Vec<Bytes> = streamer
            .yield_file(7, p, guard)
            .map(|c| c.unwrap())
            .collect()
            .await;

        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, expected(1000, 13_000));
        assert_eq!(upstream.pulls() as u64, p.chunk_count);
        assert_eq!(pool.loads(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn chunks_are_pulled_on_demand() {
        let (upstream, pool) = setup();
        let guard = pool.acquire().unwrap();
        let streamer = streamer_for(&guard);
        let p = plan(ByteInterval { from: 0, until: SIZE - 1 }, 4096);

        let mut body = Box::pin(streamer.yield_file(7, p, guard));
        assert_eq!(upstream.pulls(), 0);
        body.next().await.unwrap().unwrap();
        assert_eq!(upstream.pulls(), 1);

        // client went away
        drop(body);
        assert_eq!(upstream.pulls(), 1);
        assert_eq!(pool.loads(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn upstream_failure_ends_stream_and_releases_load() {
        let (upstream, pool) = setup();
        upstream.fail_with(Failure::PullAt(1));
        let guard = pool.acquire().unwrap();
        let streamer = streamer_for(&guard);
        let p = plan(ByteInterval { from: 0, until: SIZE - 1 }, 4096);

        let items: Vec<_> = streamer.yield_file(7, p, guard).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(StreamError::TransientUpstream(_))));
        assert_eq!(upstream.pulls(), 2);
        assert_eq!(pool.loads(), vec![(0, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_pull_times_out_and_ends_stream() {
        let (upstream, pool) = setup();
        upstream.fail_with(Failure::PullHangAt(1));
        let guard = pool.acquire().unwrap();
        let streamer = streamer_for(&guard);
        let p = plan(ByteInterval { from: 0, until: SIZE - 1 }, 4096);
        assert!(p.chunk_count > 2);

        let items: Vec<_> = streamer.yield_file(7, p, guard).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(StreamError::Timeout(limit)) if limit == Duration::from_secs(5)
        ));
        assert_eq!(upstream.pulls(), 2);
        assert_eq!(pool.loads(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn short_chunk_is_a_stream_failure() {
        let (_upstream, pool) = setup();
        let guard = pool.acquire().unwrap();
        let streamer = streamer_for(&guard);
        // claims more bytes than the object holds
        let p = plan(ByteInterval { from: 0, until: SIZE + 5000 }, 4096);

        let items: Vec<_> = streamer.yield_file(7, p, guard).collect().await;
        assert!(matches!(
            items.last(),
            Some(Err(StreamError::UpstreamExhausted { .. }))
        ));
    }
}
