// src/store/mod.rs
mod export;
mod memory;

use std::fmt;
use std::str::FromStr;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::{Event, EventScores, Target};
use crate::error::{ReconResult, ReconError};

pub use export::{ScanExport, export_scan};
pub use memory::MemoryStore;

/// Lifecycle state of a scan as persisted in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum ScanStatus {
    Initializing,
    Starting,
    Running,
    AbortRequested,
    Aborted,
    Finished,
    ErrorFailed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Initializing => "INITIALIZING",
            ScanStatus::Starting => "STARTING",
            ScanStatus::Running => "RUNNING",
            ScanStatus::AbortRequested => "ABORT-REQUESTED",
            ScanStatus::Aborted => "ABORTED",
            ScanStatus::Finished => "FINISHED",
            ScanStatus::ErrorFailed => "ERROR-FAILED",
        }
    }

    /// No further transitions happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Aborted | ScanStatus::Finished | ScanStatus::ErrorFailed)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INITIALIZING" => Ok(ScanStatus::Initializing),
            "STARTING" => Ok(ScanStatus::Starting),
            "RUNNING" => Ok(ScanStatus::Running),
            "ABORT-REQUESTED" => Ok(ScanStatus::AbortRequested),
            "ABORTED" => Ok(ScanStatus::Aborted),
            "FINISHED" => Ok(ScanStatus::Finished),
            "ERROR-FAILED" => Ok(ScanStatus::ErrorFailed),
            other => Err(ReconError::InvalidInput(format!("unknown scan status: {}", other))),
        }
    }
}

/// Persisted scan instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub name: String,
    pub target: String,
    pub target_type: String,
    pub status: ScanStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

/// Flat, persisted form of an [`Event`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub hash: String,
    pub event_type: String,
    pub module: String,
    pub data: String,
    pub parent_hash: String,
    pub generated: DateTime<Utc>,
    #[serde(flatten)]
    pub scores: EventScores,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            hash: event.hash().to_string(),
            event_type: event.event_type().to_string(),
            module: event.module().to_string(),
            data: event.data().to_string(),
            parent_hash: event.parent_hash().to_string(),
            generated: event.generated(),
            scores: event.scores(),
        }
    }
}

/// A correlation rule that fired for a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub rule_id: String,
    pub title: String,
    pub risk: String,
    pub event_hashes: Vec<String>,
}

/// Durable store the scanner reports to.
///
/// Implementations must tolerate concurrent callers: the persistence
/// listener writes from worker tasks while the dispatch loop polls status.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn create_scan(&self, id: &str, name: &str, target: &Target) -> ReconResult<()>;

    async fn set_status(
        &self,
        id: &str,
        status: ScanStatus,
        started: Option<DateTime<Utc>>,
        ended: Option<DateTime<Utc>>,
    ) -> ReconResult<()>;

    async fn scan(&self, id: &str) -> ReconResult<ScanRecord>;

    async fn store_event(&self, scan_id: &str, event: &EventRecord) -> ReconResult<()>;

    async fn events(&self, scan_id: &str) -> ReconResult<Vec<EventRecord>>;

    async fn store_correlation(&self, scan_id: &str, result: &CorrelationResult) -> ReconResult<()>;

    async fn correlations(&self, scan_id: &str) -> ReconResult<Vec<CorrelationResult>>;

    async fn scan_status(&self, id: &str) -> ReconResult<ScanStatus> {
        Ok(self.scan(id).await?.status)
    }

    /// Ask a running scan to stop; observed by the scanner's status poll
    async fn request_abort(&self, id: &str) -> ReconResult<()> {
        let status = self.scan_status(id).await?;
        if status.is_terminal() {
            return Err(ReconError::InvalidInput(format!("scan {} already {}", id, status)));
        }
        self.set_status(id, ScanStatus::AbortRequested, None, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyphenated_status_names() {
        assert_eq!(ScanStatus::ErrorFailed.to_string(), "ERROR-FAILED");
        assert_eq!("abort-requested".parse::<ScanStatus>().unwrap(), ScanStatus::AbortRequested);
        assert_eq!(serde_json::to_value(ScanStatus::AbortRequested).unwrap(), serde_json::json!("ABORT-REQUESTED"));
        assert!("PAUSED".parse::<ScanStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ScanStatus::Finished.is_terminal());
        assert!(ScanStatus::Aborted.is_terminal());
        assert!(ScanStatus::ErrorFailed.is_terminal());
        assert!(!ScanStatus::AbortRequested.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
    }
}
