//! Paginated upstream listings.
//!
//! [`PageSource`] is the contract the snapshot builder consumes;
//! [`InventoryApi`] implements it over the HTTP [`Transport`].

use crate::error::{SnapshotError, UpstreamError};
use crate::projection::Projection;
use crate::transport::Transport;
use crate::types::{Listing, ListingFilters, UpstreamConfig};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// One page of a listing to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub listing: Listing,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    pub filters: ListingFilters,
}

impl PageRequest {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("Page", self.page.to_string()), ("Limit", self.limit.to_string())];
        params.extend(self.filters.params());
        params
    }
}

/// Items of one page and whether the listing continues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub has_more: bool,
}

impl Page {
    /// Interprets a listing response.
    ///
    /// Items are read from the listing's items key, or from a bare JSON array.
    /// A full page means more pages may follow.
    pub fn from_payload(request: &PageRequest, payload: Value) -> Self {
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove(request.listing.items_key()) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let has_more = !items.is_empty() && items.len() >= request.limit as usize;
        Self { items, has_more }
    }
}

/// Source of listing pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError>;
}

/// Result of an authenticated connectivity probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub ok: bool,
    pub status: u16,
    pub sample_count: usize,
    pub rate_limit_remaining: Option<String>,
    pub base_url: String,
}

/// Listing endpoints of the Cin7 Core inventory API.
#[derive(Debug, Clone)]
pub struct InventoryApi {
    transport: Transport,
}

impl InventoryApi {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, SnapshotError> {
        Transport::new(config).map(Self::new)
    }

    /// Fetches one page and projects its items.
    pub async fn list(
        &self,
        request: &PageRequest,
        fields: Option<&[String]>,
    ) -> Result<Page, UpstreamError> {
        let page = self.fetch_page(request).await?;
        let projection = Projection::for_listing(request.listing, fields);
        Ok(Page {
            items: projection.apply_all(page.items),
            has_more: page.has_more,
        })
    }

    /// Performs a lightweight authenticated request to verify connectivity.
    pub async fn health_check(&self) -> Result<HealthReport, UpstreamError> {
        let request = PageRequest {
            listing: Listing::Products,
            page: 1,
            limit: 1,
            filters: ListingFilters::default(),
        };
        let response = self
            .transport
            .request(reqwest::Method::GET, Listing::Products.path(), &request.params(), None)
            .await?;
        let page = Page::from_payload(&request, response.payload);

        Ok(HealthReport {
            ok: true,
            status: response.status,
            sample_count: page.items.len(),
            rate_limit_remaining: response.rate_limit_remaining,
            base_url: self.transport.base_url().to_string(),
        })
    }
}

#[async_trait]
impl PageSource for InventoryApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError> {
        let payload = self
            .transport
            .get(request.listing.path(), &request.params())
            .await?;
        let page = Page::from_payload(request, payload);
        debug!(
            "Fetched {} page {}: {} items, has_more={}",
            request.listing,
            request.page,
            page.items.len(),
            page.has_more
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(listing: Listing, limit: u32) -> PageRequest {
        PageRequest {
            listing,
            page: 2,
            limit,
            filters: ListingFilters::default(),
        }
    }

    #[test]
    fn test_full_page_has_more() {
        let payload = json!({"Total": 5, "Page": 2, "Products": [{"SKU": "a"}, {"SKU": "b"}]});
        let page = Page::from_payload(&request(Listing::Products, 2), payload);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn test_short_or_empty_page_ends_listing() {
        let payload = json!({"ProductAvailabilityList": [{"SKU": "a"}]});
        let page = Page::from_payload(&request(Listing::StockAvailability, 100), payload);
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_more);

        let page = Page::from_payload(&request(Listing::Products, 100), json!({"Products": []}));
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_bare_array_and_missing_key() {
        let page = Page::from_payload(&request(Listing::Products, 1), json!([{"SKU": "a"}]));
        assert_eq!(page.items, vec![json!({"SKU": "a"})]);
        assert!(page.has_more);

        let page = Page::from_payload(&request(Listing::Products, 1), json!({"Other": [1]}));
        assert_eq!(page, Page::default());
    }

    #[test]
    fn test_request_params() {
        let req = PageRequest {
            listing: Listing::StockAvailability,
            page: 3,
            limit: 500,
            filters: ListingFilters {
                location: Some("Main Warehouse".to_string()),
                ..ListingFilters::default()
            },
        };
        assert_eq!(
            req.params(),
            vec![
                ("Page", "3".to_string()),
                ("Limit", "500".to_string()),
                ("Location", "Main Warehouse".to_string()),
            ]
        );
    }
}
