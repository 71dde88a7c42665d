// src/modules/http_headers.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, SERVER};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::core::{Event, Interest, Module, ModuleContext, ModuleMetadata, TargetType};
use crate::error::ReconResult;

pub const NAME: &str = "http_headers";

const URL_EVENT: &str = "url";
const BANNER_EVENT: &str = "webserver_banner";
const TECHNOLOGY_EVENT: &str = "webserver_technology";

/// Fetches the front page of in-scope domains and reports what the
/// response headers reveal
pub struct HttpHeadersPlugin {
    metadata: ModuleMetadata,
    probed: Mutex<HashSet<String>>,
}

impl HttpHeadersPlugin {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata::new(NAME, "Identify web servers from HTTP response headers")
                .with_categories(&["http", "active"]),
            probed: Mutex::new(HashSet::new()),
        }
    }

    fn probe_url(ctx: &ModuleContext, host: &str) -> Option<Url> {
        let scheme = if ctx.option_bool("https", true) { "https" } else { "http" };
        let raw = match ctx.option("port").and_then(Value::as_u64) {
            Some(port) => format!("{}://{}:{}/", scheme, host, port),
            None => format!("{}://{}/", scheme, host),
        };
        match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("Cannot build a URL for {}: {}", host, e);
                None
            }
        }
    }
}

impl Default for HttpHeadersPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Event types and payloads derived from a response's headers
fn header_findings(headers: &HeaderMap) -> Vec<(&'static str, String)> {
    let mut findings = Vec::new();
    let text = |value: &reqwest::header::HeaderValue| {
        value.to_str().ok().map(str::trim).filter(|v| !v.is_empty()).map(String::from)
    };

    if let Some(server) = headers.get(SERVER).and_then(text) {
        findings.push((BANNER_EVENT, server));
    }
    for name in ["x-powered-by", "x-aspnet-version", "x-generator"] {
        if let Some(value) = headers.get(name).and_then(text) {
            findings.push((TECHNOLOGY_EVENT, value));
        }
    }
    findings
}

#[async_trait]
impl Module for HttpHeadersPlugin {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn watched_events(&self) -> Interest {
        Interest::types([TargetType::Domain.as_str()])
    }

    fn produced_events(&self) -> Vec<String> {
        vec![URL_EVENT.to_string(), BANNER_EVENT.to_string(), TECHNOLOGY_EVENT.to_string()]
    }

    fn default_options(&self) -> HashMap<String, Value> {
        HashMap::from([("https".to_string(), Value::from(true))])
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> ReconResult<()> {
        let host = event.data().trim_end_matches('.').to_lowercase();
        if !ctx.target()?.matches(&host, false, true) {
            debug!("Skipping out-of-scope domain {}", host);
            return Ok(());
        }
        if !self.probed.lock().insert(host.clone()) {
            return Ok(());
        }
        let Some(url) = Self::probe_url(ctx, &host) else {
            return Ok(());
        };
        if ctx.check_for_stop() {
            return Ok(());
        }

        let response = match ctx.http().get(url.as_str()).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} got no response from {}: {}", NAME, url, e);
                return Ok(());
            }
        };

        let url_event = Arc::new(Event::new(URL_EVENT, response.url().to_string(), NAME, event)?);
        ctx.notify(Event::clone(&url_event));

        for (event_type, data) in header_findings(response.headers()) {
            ctx.notify(Event::new(event_type, data, NAME, url_event.clone())?);
        }
        Ok(())
    }
}

pub fn create() -> ReconResult<Box<dyn Module>> {
    Ok(Box::new(HttpHeadersPlugin::new()))
}
