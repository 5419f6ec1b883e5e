use async_trait::async_trait;
use invsnap::{
    Failure, FailureKind, Page, PageRequest, PageSource, RegistrySettings, SnapshotError,
    SnapshotId, SnapshotQuery, SnapshotRegistry, SnapshotStatus, StatusReport, UpstreamError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// In-memory listing served page by page, like the upstream does.
struct Catalog {
    items: Vec<Value>,
    fail_on_page: Option<u32>,
    gate: Option<Semaphore>,
    calls: AtomicU32,
}

impl Catalog {
    fn new(count: usize) -> Self {
        let items = (0..count)
            .map(|n| {
                json!({
                    "SKU": format!("SKU-{:04}", n),
                    "Name": format!("Item {}", n),
                    "Barcode": format!("9300{:06}", n),
                })
            })
            .collect();
        Self {
            items,
            fail_on_page: None,
            gate: None,
            calls: AtomicU32::new(0),
        }
    }

    fn failing_on(mut self, page: u32) -> Self {
        self.fail_on_page = Some(page);
        self
    }

    fn gated(mut self, permits: usize) -> Self {
        self.gate = Some(Semaphore::new(permits));
        self
    }

    fn open_gate(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for Catalog {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_on_page == Some(request.page) {
            return Err(UpstreamError::Exhausted {
                attempts: 3,
                last: Failure::new(FailureKind::Server(503), "service unavailable"),
            });
        }

        let start = (request.page as usize - 1) * request.limit as usize;
        let items: Vec<Value> = self
            .items
            .iter()
            .skip(start)
            .take(request.limit as usize)
            .cloned()
            .collect();
        let has_more = start + items.len() < self.items.len();
        Ok(Page { items, has_more })
    }
}

fn query(page_size: u32) -> SnapshotQuery {
    SnapshotQuery {
        page_size,
        ..SnapshotQuery::default()
    }
}

async fn settle(registry: &SnapshotRegistry, id: &SnapshotId) -> StatusReport {
    loop {
        let report = registry.status(id).await.unwrap();
        if !report.status.is_active() {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn wait_for_items(registry: &SnapshotRegistry, id: &SnapshotId, count: usize) {
    while registry.status(id).await.unwrap().fetched_count < count {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn skus(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .map(|item| item["SKU"].as_str().unwrap().to_string())
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_full_lifecycle_over_three_pages() {
    let catalog = Arc::new(Catalog::new(250));
    let registry = SnapshotRegistry::new(Arc::clone(&catalog) as Arc<dyn PageSource>);

    let id = registry.start(query(100));
    let report = settle(&registry, &id).await;
    assert_eq!(report.status, SnapshotStatus::Ready);
    assert_eq!(report.fetched_count, 250);
    assert!(!report.truncated);
    assert!(report.error.is_none());
    assert_eq!(catalog.calls(), 3);

    let first = registry.chunk(&id, 0, 100).await.unwrap();
    assert_eq!(first.items.len(), 100);
    assert_eq!(first.next_offset, Some(100));
    assert_eq!(first.items[0], json!({"SKU": "SKU-0000", "Name": "Item 0"}));

    let last = registry.chunk(&id, 200, 100).await.unwrap();
    assert_eq!(last.items.len(), 50);
    assert_eq!(last.next_offset, None);
    assert_eq!(skus(&last.items)[49], "SKU-0249");

    let past_end = registry.chunk(&id, 400, 100).await.unwrap();
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.next_offset, None);

    assert!(registry.close(&id).await);
    assert!(matches!(
        registry.status(&id).await,
        Err(SnapshotError::NotFound(_))
    ));
    assert!(!registry.close(&id).await);
}

#[test_log::test(tokio::test)]
async fn test_requested_fields_are_kept() {
    let registry = SnapshotRegistry::new(Arc::new(Catalog::new(3)));
    let id = registry.start(SnapshotQuery {
        fields: Some(vec!["Barcode".to_string()]),
        ..query(10)
    });
    settle(&registry, &id).await;

    let chunk = registry.chunk(&id, 2, 10).await.unwrap();
    assert_eq!(
        chunk.items,
        vec![json!({"SKU": "SKU-0002", "Name": "Item 2", "Barcode": "9300000002"})]
    );
}

#[test_log::test(tokio::test)]
async fn test_failure_keeps_fetched_items() {
    let registry = SnapshotRegistry::new(Arc::new(Catalog::new(250).failing_on(2)));

    let id = registry.start(query(100));
    let report = settle(&registry, &id).await;
    assert_eq!(report.status, SnapshotStatus::Failed);
    assert_eq!(report.fetched_count, 100);
    let error = report.error.unwrap();
    assert!(error.is_exhausted());
    assert_eq!(error.failure().kind, FailureKind::Server(503));

    let chunk = registry.chunk(&id, 0, 500).await.unwrap();
    assert_eq!(chunk.items.len(), 100);
    assert_eq!(chunk.status, SnapshotStatus::Failed);
    assert_eq!(chunk.next_offset, None);
}

#[test_log::test(tokio::test)]
async fn test_zero_limit_is_rejected() {
    let registry = SnapshotRegistry::new(Arc::new(Catalog::new(5)));
    let id = registry.start(query(10));
    assert!(matches!(
        registry.chunk(&id, 0, 0).await,
        Err(SnapshotError::InvalidLimit(0))
    ));
}

#[test_log::test(tokio::test)]
async fn test_item_cap_truncates() {
    let settings = RegistrySettings {
        max_items: 150,
        ..RegistrySettings::default()
    };
    let catalog = Arc::new(Catalog::new(250));
    let registry =
        SnapshotRegistry::with_settings(Arc::clone(&catalog) as Arc<dyn PageSource>, settings);

    let id = registry.start(query(100));
    let report = settle(&registry, &id).await;
    assert_eq!(report.status, SnapshotStatus::Ready);
    assert_eq!(report.fetched_count, 150);
    assert!(report.truncated);
    assert_eq!(catalog.calls(), 2);

    let tail = registry.chunk(&id, 100, 100).await.unwrap();
    assert_eq!(skus(&tail.items)[49], "SKU-0149");
    assert_eq!(tail.next_offset, None);
}

#[test_log::test(tokio::test)]
async fn test_listing_that_exactly_fills_cap_is_not_truncated() {
    let settings = RegistrySettings {
        max_items: 200,
        ..RegistrySettings::default()
    };
    let registry = SnapshotRegistry::with_settings(Arc::new(Catalog::new(200)), settings);

    let id = registry.start(query(100));
    let report = settle(&registry, &id).await;
    assert_eq!(report.fetched_count, 200);
    assert!(!report.truncated);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_expired_snapshot_is_not_found() {
    let registry = SnapshotRegistry::new(Arc::new(Catalog::new(20)));
    let id = registry.start(query(10));
    settle(&registry, &id).await;

    tokio::time::advance(Duration::from_secs(14 * 60)).await;
    let report = registry.status(&id).await.unwrap();
    assert!(report.expires_in <= Duration::from_secs(60));

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(matches!(
        registry.chunk(&id, 0, 10).await,
        Err(SnapshotError::NotFound(_))
    ));
    assert!(matches!(
        registry.status(&id).await,
        Err(SnapshotError::NotFound(_))
    ));
    assert!(!registry.close(&id).await);
    assert!(registry.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_close_while_building_stops_fetching() {
    let catalog = Arc::new(Catalog::new(1000).gated(1));
    let registry = SnapshotRegistry::new(Arc::clone(&catalog) as Arc<dyn PageSource>);

    let id = registry.start(query(10));
    wait_for_items(&registry, &id, 10).await;
    let chunk = registry.chunk(&id, 10, 10).await.unwrap();
    assert_eq!(chunk.status, SnapshotStatus::Building);
    assert!(chunk.items.is_empty());
    assert_eq!(chunk.next_offset, Some(10));

    assert!(registry.close(&id).await);
    let calls = catalog.calls();
    assert_eq!(calls, 2);

    catalog.open_gate(50);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(catalog.calls(), calls);
    assert!(matches!(
        registry.chunk(&id, 0, 10).await,
        Err(SnapshotError::NotFound(_))
    ));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_disjoint_reads_during_build() {
    let catalog = Arc::new(Catalog::new(300).gated(0));
    let registry = Arc::new(SnapshotRegistry::new(
        Arc::clone(&catalog) as Arc<dyn PageSource>
    ));
    let id = registry.start(query(25));

    let feeder = {
        let catalog = Arc::clone(&catalog);
        tokio::spawn(async move {
            for _ in 0..12 {
                catalog.open_gate(1);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|slot| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let start = slot * 100;
                let mut collected = Vec::new();
                while collected.len() < 100 {
                    let chunk = registry
                        .chunk(&id, start + collected.len(), 100 - collected.len())
                        .await
                        .unwrap();
                    if chunk.items.is_empty() {
                        assert!(chunk.next_offset.is_some());
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    collected.extend(chunk.items);
                }
                collected
            })
        })
        .collect();

    let mut all = Vec::new();
    for reader in readers {
        all.extend(reader.await.unwrap());
    }
    feeder.await.unwrap();

    let expected: Vec<String> = (0..300).map(|n| format!("SKU-{:04}", n)).collect();
    assert_eq!(skus(&all), expected);
    assert_eq!(settle(&registry, &id).await.status, SnapshotStatus::Ready);
}

#[test_log::test(tokio::test)]
async fn test_shutdown_releases_everything() {
    let catalog = Arc::new(Catalog::new(1000).gated(0));
    let registry = SnapshotRegistry::new(Arc::clone(&catalog) as Arc<dyn PageSource>);

    let ids: Vec<_> = (0..4).map(|_| registry.start(query(10))).collect();
    assert_eq!(registry.len(), 4);

    registry.shutdown().await;
    assert!(registry.is_empty());
    for id in &ids {
        assert!(matches!(
            registry.status(id).await,
            Err(SnapshotError::NotFound(_))
        ));
    }
}
