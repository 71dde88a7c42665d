// src/correlation/mod.rs
use std::collections::HashSet;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::error::ReconResult;
use crate::store::{CorrelationResult, ScanStore};

/// A threshold rule over the events of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: String,
    pub name: String,
    pub event_type: String,
    /// Distinct payloads needed before the rule fires
    pub min_count: usize,
    #[serde(default = "default_risk")]
    pub risk: String,
}

fn default_risk() -> String {
    "info".to_string()
}

/// Post-processor run once a scan has finished
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Correlator: Send + Sync {
    async fn run(
        &self,
        store: Arc<dyn ScanStore>,
        rules: &[CorrelationRule],
        scan_id: &str,
    ) -> ReconResult<Vec<CorrelationResult>>;
}

/// Evaluates threshold rules against the stored events of a scan
#[derive(Debug, Default, Clone)]
pub struct RuleCorrelator;

impl RuleCorrelator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Correlator for RuleCorrelator {
    async fn run(
        &self,
        store: Arc<dyn ScanStore>,
        rules: &[CorrelationRule],
        scan_id: &str,
    ) -> ReconResult<Vec<CorrelationResult>> {
        let events = store.events(scan_id).await?;
        let mut results = Vec::new();

        for rule in rules {
            let mut seen = HashSet::new();
            let mut hashes = Vec::new();
            for event in events.iter().filter(|e| e.event_type == rule.event_type) {
                if seen.insert(event.data.to_lowercase()) {
                    hashes.push(event.hash.clone());
                }
            }

            if seen.len() < rule.min_count.max(1) {
                debug!("Rule {} matched {} of {} needed", rule.id, seen.len(), rule.min_count);
                continue;
            }

            let result = CorrelationResult {
                rule_id: rule.id.clone(),
                title: format!("{} ({} x {})", rule.name, seen.len(), rule.event_type),
                risk: rule.risk.clone(),
                event_hashes: hashes,
            };
            store.store_correlation(scan_id, &result).await?;
            info!("Correlation rule {} fired for scan {}", rule.id, scan_id);
            results.push(result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Event, Target, TargetType};
    use crate::store::{EventRecord, MemoryStore};

    fn rule(event_type: &str, min_count: usize) -> CorrelationRule {
        CorrelationRule {
            id: format!("many_{}", event_type),
            name: format!("Many {}", event_type),
            event_type: event_type.to_string(),
            min_count,
            risk: "low".to_string(),
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let target = Target::new("example.com", TargetType::Domain).unwrap();
        store.create_scan("s1", "correlate", &target).await.unwrap();

        let root = Arc::new(Event::root("example.com"));
        for data in ["10.0.0.1", "10.0.0.2", "10.0.0.2", "nginx"] {
            let event_type = if data == "nginx" { "webserver_banner" } else { "ip" };
            let event = Event::new(event_type, data, "test", root.clone()).unwrap();
            store.store_event("s1", &EventRecord::from(&event)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_rule_fires_on_distinct_payloads() {
        let store = seeded_store().await;
        let results = RuleCorrelator::new()
            .run(store.clone(), &[rule("ip", 2), rule("ip", 3), rule("webserver_banner", 2)], "s1")
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "many_ip");
        assert_eq!(results[0].event_hashes.len(), 2);
        assert_eq!(store.correlations("s1").await.unwrap(), results);
    }

    #[tokio::test]
    async fn test_unknown_scan_is_error() {
        let store = Arc::new(MemoryStore::new());
        assert!(RuleCorrelator::new().run(store, &[rule("ip", 1)], "nope").await.is_err());
    }

    #[test]
    fn test_rule_risk_defaults_to_info() {
        let rule: CorrelationRule = toml::from_str(
            "id = \"x\"\nname = \"X\"\nevent_type = \"ip\"\nmin_count = 1\n",
        )
        .unwrap();
        assert_eq!(rule.risk, "info");
    }
}
