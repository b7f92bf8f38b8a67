//! Upstream connection pool with per-connection load accounting.
//!
//! Every request holds a [`LoadGuard`] for the connection serving it. The guard
//! is taken inside the same critical section that picks the least-loaded
//! connection, and its `Drop` gives the load back on every exit path.

use crate::services::{streamer::ByteStreamer, upstream::UpstreamClient};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tracing::debug;

/// One pooled backend connection and its live request count.
pub struct ConnectionHandle {
    pub index: usize,
    pub client: Arc<dyn UpstreamClient>,
    load: AtomicUsize,
}

impl ConnectionHandle {
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }
}

/// Fixed set of backend connections, created once at startup.
pub struct ConnectionPool {
    handles: Vec<Arc<ConnectionHandle>>,
    select_lock: Mutex<()>,
}

impl ConnectionPool {
    pub fn new(clients: Vec<Arc<dyn UpstreamClient>>) -> Self {
        let handles = clients
            .into_iter()
            .enumerate()
            .map(|(index, client)| {
                Arc::new(ConnectionHandle {
                    index,
                    client,
                    load: AtomicUsize::new(0),
                })
            })
            .collect();
        Self {
            handles,
            select_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Current load per connection, in pool order.
    pub fn loads(&self) -> Vec<(usize, usize)> {
        self.handles.iter().map(|h| (h.index, h.load())).collect()
    }

    /// Pick the least-loaded connection and charge one unit of load to it.
    ///
    /// Ties go to the earliest connection in pool order. Returns `None` only for
    /// an empty pool.
    pub fn acquire(&self) -> Option<LoadGuard> {
        let _selecting = self.select_lock.lock();
        let handle = self.handles.iter().min_by_key(|h| h.load())?;
        let previous = handle.load.fetch_add(1, Ordering::AcqRel);
        debug!(connection = handle.index, load = previous + 1, "connection selected");
        Some(LoadGuard {
            handle: Arc::clone(handle),
        })
    }
}

/// Holds one unit of load on a connection until dropped.
pub struct LoadGuard {
    handle: Arc<ConnectionHandle>,
}

impl LoadGuard {
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn index(&self) -> usize {
        self.handle.index
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let previous = self.handle.load.fetch_sub(1, Ordering::AcqRel);
        debug!(connection = self.handle.index, load = previous - 1, "connection released");
    }
}

/// Process-wide memo of stream adapters, one per connection.
pub struct AdapterCache {
    adapters: DashMap<usize, Arc<ByteStreamer>>,
    chunk_timeout: Duration,
}

impl AdapterCache {
    pub fn new(chunk_timeout: Duration) -> Self {
        Self {
            adapters: DashMap::new(),
            chunk_timeout,
        }
    }

    /// Return the adapter for `handle`, constructing it on first use.
    ///
    /// Construction runs under the map's shard lock, so concurrent first calls
    /// for the same connection produce a single adapter.
    pub fn adapter_for(&self, handle: &Arc<ConnectionHandle>) -> Arc<ByteStreamer> {
        if let Some(existing) = self.adapters.get(&handle.index) {
            debug!(connection = handle.index, "using cached stream adapter");
            return Arc::clone(existing.value());
        }
        let entry = self.adapters.entry(handle.index).or_insert_with(|| {
            debug!(connection = handle.index, "creating stream adapter");
            Arc::new(ByteStreamer::new(Arc::clone(handle), self.chunk_timeout))
        });
        Arc::clone(entry.value())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}
