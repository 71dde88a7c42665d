// src/store/export.rs
use std::path::Path;
use serde::{Serialize, Deserialize};
use tracing::info;

use super::{CorrelationResult, EventRecord, ScanRecord, ScanStore};
use crate::error::{ReconResult, ReconError};

/// Everything known about one scan, in a single serialisable document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanExport {
    pub scan: ScanRecord,
    pub events: Vec<EventRecord>,
    pub correlations: Vec<CorrelationResult>,
}

impl ScanExport {
    /// Gather the export from a store
    pub async fn collect(store: &dyn ScanStore, scan_id: &str) -> ReconResult<Self> {
        Ok(Self {
            scan: store.scan(scan_id).await?,
            events: store.events(scan_id).await?,
            correlations: store.correlations(scan_id).await?,
        })
    }

    /// Number of stored events per event type
    pub fn type_counts(&self) -> Vec<(String, usize)> {
        let mut counts = std::collections::BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.event_type.clone()).or_insert(0usize) += 1;
        }
        counts.into_iter().collect()
    }
}

/// Write a scan and its events as pretty-printed JSON
pub async fn export_scan(store: &dyn ScanStore, scan_id: &str, output_path: &Path) -> ReconResult<ScanExport> {
    let export = ScanExport::collect(store, scan_id).await?;

    let json = serde_json::to_string_pretty(&export)
        .map_err(|e| ReconError::SerializationError(format!("Failed to serialize scan: {}", e)))?;

    tokio::fs::write(output_path, json)
        .await
        .map_err(|e| ReconError::FileError {
            path: output_path.to_path_buf(),
            message: format!("Failed to write export: {}", e),
        })?;

    info!("Exported scan {} ({} events) to {}", scan_id, export.events.len(), output_path.display());
    Ok(export)
}
