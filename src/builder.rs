//! Background population of a snapshot buffer.

use crate::projection::Projection;
use crate::state::{Outcome, SnapshotState};
use crate::upstream::PageSource;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives paginated upstream fetches into one snapshot's buffer.
///
/// The builder is the only writer of its snapshot. It stops on the last
/// page, at the item cap, on an upstream error, or when cancellation is
/// requested through the state.
pub(crate) struct SnapshotBuilder {
    state: Arc<SnapshotState>,
    source: Arc<dyn PageSource>,
    max_items: usize,
}

impl SnapshotBuilder {
    pub(crate) fn new(state: Arc<SnapshotState>, source: Arc<dyn PageSource>, max_items: usize) -> Self {
        Self {
            state,
            source,
            max_items,
        }
    }

    /// Runs the build on its own task.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let id = self.state.id();
        if !self.state.begin_building() {
            return;
        }
        let outcome = self.fetch_pages().await;
        let status = self.state.finish(outcome);
        let (len, truncated) = {
            let progress = self.state.read();
            (progress.items.len(), progress.truncated)
        };
        info!(
            "Snapshot {} {} with {} items{}",
            id,
            status,
            len,
            if truncated { " (truncated at cap)" } else { "" }
        );
    }

    async fn fetch_pages(&self) -> Outcome {
        let state = &self.state;
        let query = state.query();
        let projection = Projection::for_listing(query.listing, query.fields.as_deref());
        let mut page = query.start_page;

        loop {
            if state.cancel_requested() {
                return Outcome::Cancelled;
            }

            let request = query.page_request(page);
            // a fetch dropped here has appended nothing yet
            let fetched = tokio::select! {
                biased;
                _ = state.cancelled() => return Outcome::Cancelled,
                fetched = self.source.fetch_page(&request) => fetched,
            };

            let fetched = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("Snapshot {} failed on page {}: {}", state.id(), page, e);
                    return Outcome::Failed(e);
                }
            };

            let has_more = fetched.has_more;
            let items = projection.apply_all(fetched.items);
            let (len, dropped) = state.append(items, self.max_items);
            debug!(
                "Snapshot {} page {} appended, {} items buffered",
                state.id(),
                page,
                len
            );

            if dropped || (has_more && len >= self.max_items) {
                return Outcome::Complete { truncated: true };
            }
            if !has_more {
                return Outcome::Complete { truncated: false };
            }
            page = match page.checked_add(1) {
                Some(next) => next,
                None => return Outcome::Complete { truncated: true },
            };
        }
    }
}
