// src/store/memory.rs
use std::collections::HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{CorrelationResult, EventRecord, ScanRecord, ScanStatus, ScanStore};
use crate::core::Target;
use crate::error::{ReconResult, ReconError};

struct ScanEntry {
    record: ScanRecord,
    history: Vec<ScanStatus>,
    events: Vec<EventRecord>,
    correlations: Vec<CorrelationResult>,
}

/// Process-local store, used by the CLI and the test suite
#[derive(Default)]
pub struct MemoryStore {
    scans: RwLock<HashMap<String, ScanEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status the scan has been set to, oldest first
    pub fn status_history(&self, id: &str) -> Vec<ScanStatus> {
        self.scans
            .read()
            .get(id)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    pub fn scan_ids(&self) -> Vec<String> {
        self.scans.read().keys().cloned().collect()
    }

    fn not_found(id: &str) -> ReconError {
        ReconError::StoreError(format!("scan {} not found", id))
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn create_scan(&self, id: &str, name: &str, target: &Target) -> ReconResult<()> {
        let mut scans = self.scans.write();
        if scans.contains_key(id) {
            return Err(ReconError::StoreError(format!("scan {} already exists", id)));
        }

        let record = ScanRecord {
            id: id.to_string(),
            name: name.to_string(),
            target: target.value().to_string(),
            target_type: target.target_type().to_string(),
            status: ScanStatus::Initializing,
            created: Utc::now(),
            started: None,
            ended: None,
        };
        scans.insert(id.to_string(), ScanEntry {
            record,
            history: vec![ScanStatus::Initializing],
            events: Vec::new(),
            correlations: Vec::new(),
        });

        debug!("Created scan {} ({})", id, name);
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: ScanStatus,
        started: Option<DateTime<Utc>>,
        ended: Option<DateTime<Utc>>,
    ) -> ReconResult<()> {
        let mut scans = self.scans.write();
        let entry = scans.get_mut(id).ok_or_else(|| Self::not_found(id))?;

        entry.record.status = status;
        if started.is_some() {
            entry.record.started = started;
        }
        if ended.is_some() {
            entry.record.ended = ended;
        }
        entry.history.push(status);
        Ok(())
    }

    async fn scan(&self, id: &str) -> ReconResult<ScanRecord> {
        self.scans
            .read()
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn store_event(&self, scan_id: &str, event: &EventRecord) -> ReconResult<()> {
        let mut scans = self.scans.write();
        let entry = scans.get_mut(scan_id).ok_or_else(|| Self::not_found(scan_id))?;
        entry.events.push(event.clone());
        Ok(())
    }

    async fn events(&self, scan_id: &str) -> ReconResult<Vec<EventRecord>> {
        self.scans
            .read()
            .get(scan_id)
            .map(|entry| entry.events.clone())
            .ok_or_else(|| Self::not_found(scan_id))
    }

    async fn store_correlation(&self, scan_id: &str, result: &CorrelationResult) -> ReconResult<()> {
        let mut scans = self.scans.write();
        let entry = scans.get_mut(scan_id).ok_or_else(|| Self::not_found(scan_id))?;
        entry.correlations.push(result.clone());
        Ok(())
    }

    async fn correlations(&self, scan_id: &str) -> ReconResult<Vec<CorrelationResult>> {
        self.scans
            .read()
            .get(scan_id)
            .map(|entry| entry.correlations.clone())
            .ok_or_else(|| Self::not_found(scan_id))
    }
}
