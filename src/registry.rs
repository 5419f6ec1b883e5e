//! Process-local registry of live snapshots.
//!
//! The registry is the single owner of snapshot lifecycles: it creates
//! snapshots and spawns their builders, answers status and chunk reads, and
//! releases snapshots on close, on expiry, or on shutdown.
//!
//! Expiry is lazy: a snapshot past its time-to-live is released the next
//! time anyone touches it. Until then its buffer stays in memory, and its
//! builder may keep fetching even though nobody can read the result. Callers
//! that need a hard bound on retained memory can run
//! [`SnapshotRegistry::spawn_sweeper`] as well.

use crate::builder::SnapshotBuilder;
use crate::chunk::read_chunk;
use crate::error::SnapshotError;
use crate::state::{Outcome, SnapshotState};
use crate::types::{Chunk, RegistrySettings, SnapshotId, SnapshotQuery, StatusReport};
use crate::upstream::PageSource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// A registered snapshot and the handle of its builder task.
struct SnapshotEntry {
    state: Arc<SnapshotState>,
    builder: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotEntry {
    /// Cancels the builder and waits for it to stop.
    async fn release(&self) {
        self.state.request_cancel();
        let handle = self.builder.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Builder for snapshot {} ended abnormally: {}", self.state.id(), e);
            }
        }
        // a panicked builder never recorded its outcome
        self.state.finish(Outcome::Cancelled);
    }
}

impl Drop for SnapshotEntry {
    fn drop(&mut self) {
        self.state.request_cancel();
        if let Some(handle) = self.builder.get_mut().take() {
            handle.abort();
        }
    }
}

/// Registry of in-memory snapshots over a paginated upstream listing.
///
/// # Example
///
/// ```no_run
/// use invsnap::{InventoryApi, SnapshotQuery, SnapshotRegistry, UpstreamConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let api = InventoryApi::from_config(&UpstreamConfig::from_env()?)?;
/// let registry = SnapshotRegistry::new(Arc::new(api));
///
/// let id = registry.start(SnapshotQuery::default());
/// let chunk = registry.chunk(&id, 0, 100).await?;
/// println!("{} items, next offset {:?}", chunk.items.len(), chunk.next_offset);
/// registry.close(&id).await;
/// # Ok(())
/// # }
/// ```
pub struct SnapshotRegistry {
    entries: DashMap<SnapshotId, Arc<SnapshotEntry>>,
    source: Arc<dyn PageSource>,
    settings: RegistrySettings,
}

impl SnapshotRegistry {
    pub fn new(source: Arc<dyn PageSource>) -> Self {
        Self::with_settings(source, RegistrySettings::default())
    }

    pub fn with_settings(source: Arc<dyn PageSource>, settings: RegistrySettings) -> Self {
        Self {
            entries: DashMap::new(),
            source,
            settings,
        }
    }

    pub fn settings(&self) -> RegistrySettings {
        self.settings
    }

    /// Number of registered snapshots, expired ones included until released.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a new snapshot and starts building it in the background.
    ///
    /// Returns as soon as the snapshot is registered; no upstream request is
    /// awaited. Must be called from within a Tokio runtime.
    pub fn start(&self, query: SnapshotQuery) -> SnapshotId {
        let query = query.normalized();
        loop {
            let id = SnapshotId::new();
            // the shard stays locked until the entry is in place
            if let Entry::Vacant(slot) = self.entries.entry(id) {
                let state = Arc::new(SnapshotState::new(id, query.clone(), self.settings.ttl));
                let handle = SnapshotBuilder::new(
                    Arc::clone(&state),
                    Arc::clone(&self.source),
                    self.settings.max_items,
                )
                .spawn();
                slot.insert(Arc::new(SnapshotEntry {
                    state,
                    builder: Mutex::new(Some(handle)),
                }));
                info!(
                    "Started {} snapshot {} (page size {}, expires in {})",
                    query.listing,
                    id,
                    query.page_size,
                    humantime::format_duration(self.settings.ttl)
                );
                return id;
            }
        }
    }

    /// Current status of a snapshot.
    pub async fn status(&self, id: &SnapshotId) -> Result<StatusReport, SnapshotError> {
        let state = self.lookup(id).await?;
        Ok(state.report(Instant::now()))
    }

    /// Reads up to `limit` items starting at `offset`.
    ///
    /// Works in every status; while the snapshot is building the returned
    /// cursor stays open even at the current end of the buffer.
    pub async fn chunk(
        &self,
        id: &SnapshotId,
        offset: usize,
        limit: usize,
    ) -> Result<Chunk, SnapshotError> {
        let state = self.lookup(id).await?;
        read_chunk(&state, offset, limit)
    }

    /// Closes a snapshot, stopping its builder first.
    ///
    /// Returns whether a live snapshot was closed. Unknown, expired, and
    /// already closed ids are a no-op.
    pub async fn close(&self, id: &SnapshotId) -> bool {
        let Some((_, entry)) = self.entries.remove(id) else {
            return false;
        };
        let expired = entry.state.is_expired(Instant::now());
        entry.release().await;
        debug!("Closed snapshot {} (expired: {})", id, expired);
        !expired
    }

    /// Releases every expired snapshot. Returns how many were released.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SnapshotId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().state.is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let released: Vec<_> = expired
            .iter()
            .filter_map(|id| self.entries.remove(id).map(|(_, entry)| entry))
            .collect();
        let count = released.len();
        join_all(released.iter().map(|entry| entry.release())).await;

        if count > 0 {
            info!("Released {} expired snapshot(s)", count);
        }
        count
    }

    /// Periodically releases expired snapshots.
    ///
    /// The task holds only a weak reference and ends once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep_expired().await;
            }
        })
    }

    /// Closes every snapshot and waits for all builders to stop.
    pub async fn shutdown(&self) {
        let ids: Vec<SnapshotId> = self.entries.iter().map(|entry| *entry.key()).collect();
        let released: Vec<_> = ids
            .iter()
            .filter_map(|id| self.entries.remove(id).map(|(_, entry)| entry))
            .collect();
        join_all(released.iter().map(|entry| entry.release())).await;
        info!("Snapshot registry shut down ({} snapshot(s) released)", released.len());
    }

    /// Live state for `id`, releasing it first if it has expired.
    async fn lookup(&self, id: &SnapshotId) -> Result<Arc<SnapshotState>, SnapshotError> {
        let entry = self
            .entries
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SnapshotError::NotFound(id.to_string()))?;

        if entry.state.is_expired(Instant::now()) {
            // whoever removes the entry is the one that releases it
            if self
                .entries
                .remove_if(id, |_, current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                let age = entry.state.created_at().elapsed();
                entry.release().await;
                debug!(
                    "Released snapshot {} on access, expired after {}",
                    id,
                    humantime::format_duration(Duration::from_secs(age.as_secs()))
                );
            }
            return Err(SnapshotError::NotFound(id.to_string()));
        }
        Ok(Arc::clone(&entry.state))
    }
}
