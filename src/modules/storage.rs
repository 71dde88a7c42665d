// src/modules/storage.rs
use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::{Event, Interest, Module, ModuleContext, ModuleMetadata};
use crate::error::{ReconResult, ReconError};
use crate::store::EventRecord;

pub const NAME: &str = "stor_db";

/// Writes every event, including store-only ones, to the scan store
pub struct StoragePlugin {
    metadata: ModuleMetadata,
}

impl StoragePlugin {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata::new(NAME, "Persist scan events to the scan store")
                .with_priority(0)
                .with_categories(&["storage"]),
        }
    }
}

impl Default for StoragePlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Cut `data` to at most `max_bytes`, on a character boundary. Zero keeps everything.
fn truncate(data: &str, max_bytes: usize) -> &str {
    if max_bytes == 0 || data.len() <= max_bytes {
        return data;
    }
    let mut end = max_bytes;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    &data[..end]
}

#[async_trait]
impl Module for StoragePlugin {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn watched_events(&self) -> Interest {
        Interest::Any
    }

    fn default_options(&self) -> HashMap<String, Value> {
        HashMap::from([("maxstorage".to_string(), Value::from(1024))])
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> ReconResult<()> {
        let max_bytes = ctx
            .option("maxstorage")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let mut record = EventRecord::from(event.as_ref());
        let kept = truncate(&record.data, max_bytes).len();
        if kept < record.data.len() {
            debug!("Truncating {} event from {} to {} bytes", record.event_type, record.module, kept);
            record.data.truncate(kept);
        }

        ctx.store()
            .store_event(ctx.scan_id(), &record)
            .await
            .map_err(|e| ReconError::module(NAME, format!("failed to store {}: {}", record.hash, e)))
    }

    fn is_persistence(&self) -> bool {
        true
    }
}

pub fn create() -> ReconResult<Box<dyn Module>> {
    Ok(Box::new(StoragePlugin::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Target, TargetType};
    use crate::store::{MemoryStore, ScanStore};
    use crate::utils::http::HttpClient;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn context(store: Arc<MemoryStore>, maxstorage: u64) -> ModuleContext {
        let target = Target::new("example.com", TargetType::Domain).unwrap();
        store.create_scan("s1", "storage", &target).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        ModuleContext::new(
            NAME,
            "s1",
            HashMap::from([("maxstorage".to_string(), Value::from(maxstorage))]),
            tx,
            None,
            CancellationToken::new(),
            store,
            HttpClient::new(None, Some(1), None).unwrap(),
        )
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("héllo", 3), "hé");
        assert_eq!(truncate("hello", 0), "hello");
    }

    #[tokio::test]
    async fn test_stores_event_with_lineage() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), 1024).await;
        let plugin = StoragePlugin::new();

        let root = Arc::new(Event::root("example.com"));
        let domain = Arc::new(Event::new("domain", "example.com", "reconflow", root.clone()).unwrap());
        plugin.handle_event(&ctx, root).await.unwrap();
        plugin.handle_event(&ctx, domain.clone()).await.unwrap();

        let events = store.events("s1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].hash, "ROOT");
        assert_eq!(events[1].parent_hash, "ROOT");
        assert_eq!(events[1].hash, domain.hash());
        assert!(plugin.is_persistence());
        assert_eq!(plugin.metadata().priority, 0);
    }

    #[tokio::test]
    async fn test_large_payloads_truncated() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), 8).await;

        let root = Arc::new(Event::root("example.com"));
        let page = Arc::new(Event::new("raw_content", "0123456789abcdef", "crawler", root).unwrap());
        StoragePlugin::new().handle_event(&ctx, page).await.unwrap();

        assert_eq!(store.events("s1").await.unwrap()[0].data, "01234567");
    }

    #[tokio::test]
    async fn test_store_failure_is_module_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = ModuleContext::new(
            NAME,
            "unknown-scan",
            HashMap::new(),
            tx,
            None,
            CancellationToken::new(),
            Arc::new(MemoryStore::new()),
            HttpClient::new(None, Some(1), None).unwrap(),
        );
        let root = Arc::new(Event::root("example.com"));

        let result = StoragePlugin::new().handle_event(&ctx, root).await;
        assert!(matches!(result, Err(ReconError::ModuleRuntimeError { .. })));
    }
}
