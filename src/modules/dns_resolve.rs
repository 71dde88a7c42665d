// src/modules/dns_resolve.rs
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::{Event, Interest, Module, ModuleContext, ModuleMetadata, Target, TargetAlias, TargetType};
use crate::error::ReconResult;

pub const NAME: &str = "dns_resolve";

/// Resolves in-scope domains to their addresses
pub struct DnsResolvePlugin {
    metadata: ModuleMetadata,
    resolved: Mutex<HashSet<String>>,
}

impl DnsResolvePlugin {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata::new(NAME, "Resolve domains to IPv4 and IPv6 addresses")
                .with_priority(2)
                .with_categories(&["dns", "passive"]),
            resolved: Mutex::new(HashSet::new()),
        }
    }

    /// Addresses `host` resolves to, in resolver order and without repeats
    async fn resolve(host: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => {
                let mut seen = HashSet::new();
                addrs.map(|a| a.ip()).filter(|ip| seen.insert(*ip)).collect()
            }
            Err(e) => {
                debug!("Could not resolve {}: {}", host, e);
                Vec::new()
            }
        }
    }
}

impl Default for DnsResolvePlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn address_type(ip: &IpAddr) -> TargetType {
    match ip {
        IpAddr::V4(_) => TargetType::Ip,
        IpAddr::V6(_) => TargetType::Ipv6,
    }
}

#[async_trait]
impl Module for DnsResolvePlugin {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    async fn setup(&mut self, ctx: &ModuleContext) -> ReconResult<()> {
        if let Some(server) = ctx.option_str("_dnsserver") {
            info!("{} uses the system resolver, ignoring custom DNS server {}", NAME, server);
        }
        Ok(())
    }

    fn watched_events(&self) -> Interest {
        Interest::types([TargetType::Domain.as_str()])
    }

    fn produced_events(&self) -> Vec<String> {
        vec![TargetType::Ip.as_str().to_string(), TargetType::Ipv6.as_str().to_string()]
    }

    fn default_options(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("resolve_targets".to_string(), Value::from(true)),
            ("in_scope_only".to_string(), Value::from(true)),
        ])
    }

    async fn enrich_target(&self, ctx: &ModuleContext, target: &Target) -> Vec<TargetAlias> {
        if !ctx.option_bool("resolve_targets", true) || target.target_type() != TargetType::Domain {
            return Vec::new();
        }

        let names: Vec<String> = target
            .aliases()
            .filter(|a| a.alias_type == TargetType::Domain)
            .map(|a| a.value.clone())
            .collect();

        let mut aliases = Vec::new();
        for name in names {
            for ip in Self::resolve(&name).await {
                aliases.push(TargetAlias::new(ip.to_string(), address_type(&ip)));
            }
        }
        debug!("{} contributed {} target aliases", NAME, aliases.len());
        aliases
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> ReconResult<()> {
        let host = event.data().trim_end_matches('.').to_lowercase();

        if ctx.option_bool("in_scope_only", true) && !ctx.target()?.matches(&host, false, true) {
            debug!("Skipping out-of-scope domain {}", host);
            return Ok(());
        }
        if !self.resolved.lock().insert(host.clone()) {
            return Ok(());
        }

        for ip in Self::resolve(&host).await {
            if ctx.check_for_stop() {
                return Ok(());
            }
            let event_type = address_type(&ip).as_str();
            ctx.notify(Event::new(event_type, ip.to_string(), NAME, event.clone())?);
        }
        Ok(())
    }
}

pub fn create() -> ReconResult<Box<dyn Module>> {
    Ok(Box::new(DnsResolvePlugin::new()))
}
