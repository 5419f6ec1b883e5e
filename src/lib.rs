//! invsnap - Bounded snapshot cache over paginated inventory API listings
//!
//! This library materializes a multi-page upstream listing (products or stock
//! availability from the Cin7 Core inventory API) into a process-local,
//! time-boxed buffer that callers page through at their own pace,
//! independently of the upstream pagination and rate limits.
//!
//! # Features
//!
//! - **Non-blocking Start**: Snapshots build on background tasks; `start` returns an id immediately
//! - **Chunked Reads While Building**: Offset/limit reads with a continuation cursor, consistent under concurrent appends
//! - **Bounded Memory**: Each snapshot holds at most 250,000 items and expires 15 minutes after creation
//! - **Field Projection**: Items are reduced to a default field subset plus requested fields
//! - **Automatic Retry**: Rate limits, server errors and network failures are retried with exponential backoff
//!
//! # Example
//!
//! ```no_run
//! use invsnap::{InventoryApi, SnapshotQuery, SnapshotRegistry, UpstreamConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = InventoryApi::from_config(&UpstreamConfig::from_env()?)?;
//! let registry = SnapshotRegistry::new(Arc::new(api));
//!
//! let id = registry.start(SnapshotQuery::default());
//! let mut offset = Some(0);
//! while let Some(at) = offset {
//!     let chunk = registry.chunk(&id, at, 500).await?;
//!     if chunk.items.is_empty() && chunk.next_offset.is_some() {
//!         // still building: nothing new yet
//!         tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!     }
//!     offset = chunk.next_offset;
//! }
//! registry.close(&id).await;
//! # Ok(())
//! # }
//! ```

mod builder;
mod chunk;
pub mod error;
pub mod projection;
pub mod registry;
pub mod service;
mod state;
pub mod transport;
pub mod types;
pub mod upstream;

pub use chunk::next_offset;
pub use error::{Failure, FailureKind, SnapshotError, UpstreamError};
pub use projection::Projection;
pub use registry::SnapshotRegistry;
pub use service::{
    ChunkResponse, CloseResponse, SnapshotService, StartSnapshotRequest, StartSnapshotResponse,
    StatusResponse,
};
pub use transport::{Backoff, RetryPolicy, Transport};
pub use types::{
    Chunk, Listing, ListingFilters, RegistrySettings, SnapshotId, SnapshotQuery, SnapshotStatus,
    StatusReport, UpstreamConfig, SNAPSHOT_MAX_ITEMS, SNAPSHOT_TTL,
};
pub use upstream::{HealthReport, InventoryApi, Page, PageRequest, PageSource};
