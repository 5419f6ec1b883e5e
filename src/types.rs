//! Data structures shared by the snapshot cache and the upstream client.

use crate::error::{SnapshotError, UpstreamError};
use crate::transport::RetryPolicy;
use crate::upstream::PageRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// How long a snapshot stays readable after creation.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(15 * 60);

/// Maximum number of items buffered by a single snapshot.
pub const SNAPSHOT_MAX_ITEMS: usize = 250_000;

/// Upstream page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size the upstream listing endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Default Cin7 Core (DEAR v2) API root.
pub const DEFAULT_BASE_URL: &str = "https://inventory.dearsystems.com/ExternalApi/v2/";

/// Opaque identifier of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SnapshotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Paginated upstream listing a snapshot is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Listing {
    /// `GET Product`
    #[default]
    Products,
    /// `GET ref/productavailability`
    StockAvailability,
}

impl Listing {
    /// Endpoint path relative to the API root.
    pub fn path(self) -> &'static str {
        match self {
            Listing::Products => "Product",
            Listing::StockAvailability => "ref/productavailability",
        }
    }

    /// Key of the items array in the listing response.
    pub fn items_key(self) -> &'static str {
        match self {
            Listing::Products => "Products",
            Listing::StockAvailability => "ProductAvailabilityList",
        }
    }

    /// Fields every projected item keeps.
    pub fn base_fields(self) -> &'static [&'static str] {
        match self {
            Listing::Products => &["SKU", "Name"],
            Listing::StockAvailability => &["SKU", "Location", "OnHand", "Available"],
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listing::Products => write!(f, "products"),
            Listing::StockAvailability => write!(f, "stock availability"),
        }
    }
}

/// Optional upstream filters. Empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ListingFilters {
    /// Upstream query parameters for the filters that are set.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        [
            ("Name", &self.name),
            ("Sku", &self.sku),
            ("Location", &self.location),
        ]
        .into_iter()
        .filter_map(|(key, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some((key, v.to_string())),
            _ => None,
        })
        .collect()
    }
}

/// Parameters a snapshot was started with. Immutable once the snapshot exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub listing: Listing,
    /// First upstream page to fetch (1-based).
    pub start_page: u32,
    /// Upstream page size used while building.
    pub page_size: u32,
    #[serde(flatten)]
    pub filters: ListingFilters,
    /// Extra fields kept on top of the listing defaults; `*` keeps everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl Default for SnapshotQuery {
    fn default() -> Self {
        Self {
            listing: Listing::Products,
            start_page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            filters: ListingFilters::default(),
            fields: None,
        }
    }
}

impl SnapshotQuery {
    pub fn new(listing: Listing) -> Self {
        Self {
            listing,
            ..Self::default()
        }
    }

    /// Clamps paging parameters into the range the upstream accepts.
    pub fn normalized(mut self) -> Self {
        self.start_page = self.start_page.max(1);
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Upstream request for the given page of this query.
    pub fn page_request(&self, page: u32) -> PageRequest {
        PageRequest {
            listing: self.listing,
            page,
            limit: self.page_size,
            filters: self.filters.clone(),
        }
    }
}

/// Lifecycle of a snapshot.
///
/// `pending -> building -> {ready, failed}`, or `building -> closed` when cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Building,
    Ready,
    Failed,
    Closed,
}

impl SnapshotStatus {
    /// True while the buffer may still grow.
    pub fn is_active(self) -> bool {
        matches!(self, SnapshotStatus::Pending | SnapshotStatus::Building)
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotStatus::Pending => "pending",
            SnapshotStatus::Building => "building",
            SnapshotStatus::Ready => "ready",
            SnapshotStatus::Failed => "failed",
            SnapshotStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a snapshot.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub id: SnapshotId,
    pub status: SnapshotStatus,
    pub fetched_count: usize,
    /// The build stopped at the item cap while the upstream still had data.
    pub truncated: bool,
    pub error: Option<UpstreamError>,
    pub query: SnapshotQuery,
    /// Time left before the snapshot expires.
    pub expires_in: Duration,
}

/// A slice of a snapshot's buffer with its continuation cursor.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub items: Vec<Value>,
    /// Offset to request next, or `None` once the snapshot is exhausted.
    pub next_offset: Option<usize>,
    pub status: SnapshotStatus,
    pub fetched_count: usize,
}

/// Configuration for talking to the upstream inventory API.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// API root, e.g. `<https://inventory.dearsystems.com/ExternalApi/v2/>`
    pub base_url: String,
    /// Sent as `api-auth-accountid`.
    pub account_id: String,
    /// Sent as `api-auth-applicationkey`.
    pub application_key: String,
    /// Total time allowed for one attempt (default: 30s).
    pub request_timeout: Duration,
    /// Time allowed to establish a connection (default: 10s).
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            account_id: String::new(),
            application_key: String::new(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl UpstreamConfig {
    /// Reads `CIN7_ACCOUNT_ID`, `CIN7_API_KEY` and optionally `CIN7_BASE_URL`.
    pub fn from_env() -> Result<Self, SnapshotError> {
        let account_id = std::env::var("CIN7_ACCOUNT_ID").unwrap_or_default();
        let application_key = std::env::var("CIN7_API_KEY").unwrap_or_default();
        if account_id.is_empty() || application_key.is_empty() {
            return Err(SnapshotError::Config(
                "missing CIN7_ACCOUNT_ID or CIN7_API_KEY in environment".to_string(),
            ));
        }

        let mut config = Self {
            account_id,
            application_key,
            ..Self::default()
        };
        if let Ok(base_url) = std::env::var("CIN7_BASE_URL") {
            if !base_url.is_empty() {
                config.base_url = base_url;
            }
        }
        Ok(config)
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("application_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Limits applied by the snapshot registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Lifetime of a snapshot, counted from creation (default: 15 minutes).
    pub ttl: Duration,
    /// Item cap per snapshot (default: 250,000).
    pub max_items: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ttl: SNAPSHOT_TTL,
            max_items: SNAPSHOT_MAX_ITEMS,
        }
    }
}
