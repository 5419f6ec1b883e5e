//! Per-snapshot state shared by the registry, the builder and chunk readers.

use crate::error::UpstreamError;
use crate::types::{SnapshotId, SnapshotQuery, SnapshotStatus, StatusReport};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Mutable part of a snapshot, guarded by one lock so that status, length
/// and items are always observed together.
#[derive(Debug)]
pub(crate) struct Progress {
    pub(crate) status: SnapshotStatus,
    pub(crate) items: Vec<Value>,
    pub(crate) truncated: bool,
    pub(crate) error: Option<UpstreamError>,
}

/// How a build ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Complete { truncated: bool },
    Failed(UpstreamError),
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct SnapshotState {
    id: SnapshotId,
    query: SnapshotQuery,
    created_at: Instant,
    expires_at: Instant,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
    progress: RwLock<Progress>,
}

impl SnapshotState {
    pub(crate) fn new(id: SnapshotId, query: SnapshotQuery, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            id,
            query,
            created_at,
            expires_at: created_at + ttl,
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            progress: RwLock::new(Progress {
                status: SnapshotStatus::Pending,
                items: Vec::new(),
                truncated: false,
                error: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> SnapshotId {
        self.id
    }

    pub(crate) fn query(&self) -> &SnapshotQuery {
        &self.query
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Asks the builder to stop. Safe to call more than once.
    pub(crate) fn request_cancel(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            // a stored permit wakes the builder even if it is not waiting yet
            self.cancel_notify.notify_one();
        }
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested.
    pub(crate) async fn cancelled(&self) {
        if self.cancel_requested() {
            return;
        }
        self.cancel_notify.notified().await;
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Progress> {
        self.progress.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Progress> {
        self.progress.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// `pending -> building`. Returns false if the snapshot already left `pending`.
    pub(crate) fn begin_building(&self) -> bool {
        let mut progress = self.write();
        if progress.status != SnapshotStatus::Pending {
            return false;
        }
        progress.status = SnapshotStatus::Building;
        true
    }

    /// Appends a page of items, keeping the buffer within `max_items`.
    ///
    /// Returns the buffer length after the append and whether items had to
    /// be dropped to respect the cap.
    pub(crate) fn append(&self, items: Vec<Value>, max_items: usize) -> (usize, bool) {
        let mut progress = self.write();
        let room = max_items.saturating_sub(progress.items.len());
        let dropped = items.len() > room;
        progress.items.extend(items.into_iter().take(room));
        (progress.items.len(), dropped)
    }

    /// Moves an active snapshot to its terminal status.
    ///
    /// Terminal statuses are never overwritten.
    pub(crate) fn finish(&self, outcome: Outcome) -> SnapshotStatus {
        let mut progress = self.write();
        if !progress.status.is_active() {
            return progress.status;
        }
        progress.status = match outcome {
            Outcome::Complete { truncated } => {
                progress.truncated = truncated;
                SnapshotStatus::Ready
            }
            Outcome::Failed(error) => {
                progress.error = Some(error);
                SnapshotStatus::Failed
            }
            Outcome::Cancelled => SnapshotStatus::Closed,
        };
        progress.status
    }

    pub(crate) fn report(&self, now: Instant) -> StatusReport {
        let progress = self.read();
        StatusReport {
            id: self.id,
            status: progress.status,
            fetched_count: progress.items.len(),
            truncated: progress.truncated,
            error: progress.error.clone(),
            query: self.query.clone(),
            expires_in: self.expires_at.saturating_duration_since(now),
        }
    }
}
