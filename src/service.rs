//! Snapshot operations as request/response values.
//!
//! This is the surface exposed to whatever frames requests at the boundary:
//! ids travel as strings and every response serializes to camelCase JSON.

use crate::error::SnapshotError;
use crate::registry::SnapshotRegistry;
use crate::types::{
    Listing, ListingFilters, SnapshotId, SnapshotQuery, SnapshotStatus, StatusReport,
    DEFAULT_PAGE_SIZE,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Parameters of a snapshot start request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSnapshotRequest {
    #[serde(default)]
    pub listing: Listing,
    /// Starting page (1-based).
    #[serde(default = "default_page")]
    pub page: u32,
    /// Upstream page size used while building (max 1000).
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(flatten)]
    pub filters: ListingFilters,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

impl Default for StartSnapshotRequest {
    fn default() -> Self {
        Self {
            listing: Listing::default(),
            page: default_page(),
            limit: default_limit(),
            filters: ListingFilters::default(),
            fields: None,
        }
    }
}

impl From<StartSnapshotRequest> for SnapshotQuery {
    fn from(request: StartSnapshotRequest) -> Self {
        SnapshotQuery {
            listing: request.listing,
            start_page: request.page,
            page_size: request.limit,
            filters: request.filters,
            fields: request.fields,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSnapshotResponse {
    pub snapshot_id: String,
    pub status: SnapshotStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub snapshot_id: String,
    pub status: SnapshotStatus,
    pub fetched_count: usize,
    pub truncated: bool,
    pub error: Option<String>,
    pub params: SnapshotQuery,
    pub expires_in_secs: u64,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            snapshot_id: report.id.to_string(),
            status: report.status,
            fetched_count: report.fetched_count,
            truncated: report.truncated,
            error: report.error.map(|e| e.to_string()),
            params: report.query,
            expires_in_secs: report.expires_in.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub snapshot_id: String,
    pub status: SnapshotStatus,
    pub fetched_count: usize,
    pub items: Vec<Value>,
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    pub ok: bool,
    pub snapshot_id: String,
    pub existed: bool,
}

/// String-keyed front of a [`SnapshotRegistry`].
#[derive(Clone)]
pub struct SnapshotService {
    registry: Arc<SnapshotRegistry>,
}

impl SnapshotService {
    pub fn new(registry: Arc<SnapshotRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    /// Starts a snapshot build. Never fails; upstream errors surface through status.
    pub fn start(&self, request: StartSnapshotRequest) -> StartSnapshotResponse {
        debug!("Snapshot start requested: {:?}", request);
        let id = self.registry.start(request.into());
        StartSnapshotResponse {
            snapshot_id: id.to_string(),
            status: SnapshotStatus::Pending,
        }
    }

    pub async fn status(&self, snapshot_id: &str) -> Result<StatusResponse, SnapshotError> {
        let id = parse_id(snapshot_id)?;
        self.registry.status(&id).await.map(StatusResponse::from)
    }

    pub async fn chunk(
        &self,
        snapshot_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<ChunkResponse, SnapshotError> {
        let id = parse_id(snapshot_id)?;
        let chunk = self.registry.chunk(&id, offset, limit).await?;
        Ok(ChunkResponse {
            snapshot_id: id.to_string(),
            status: chunk.status,
            fetched_count: chunk.fetched_count,
            items: chunk.items,
            next_offset: chunk.next_offset,
        })
    }

    /// Closes a snapshot. Unknown ids are acknowledged with `existed: false`.
    pub async fn close(&self, snapshot_id: &str) -> CloseResponse {
        let existed = match snapshot_id.parse::<SnapshotId>() {
            Ok(id) => self.registry.close(&id).await,
            Err(_) => false,
        };
        CloseResponse {
            ok: true,
            snapshot_id: snapshot_id.to_string(),
            existed,
        }
    }
}

/// Ids that do not parse cannot name a snapshot.
fn parse_id(snapshot_id: &str) -> Result<SnapshotId, SnapshotError> {
    snapshot_id
        .parse()
        .map_err(|_| SnapshotError::NotFound(snapshot_id.to_string()))
}
