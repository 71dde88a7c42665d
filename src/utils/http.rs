// src/utils/http.rs
use std::time::Duration;
use reqwest::{Client, Proxy, Response};
use tracing::debug;

use crate::config::Config;
use crate::error::{ReconResult, ReconError};

/// HTTP client shared by every module in a scan
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    user_agent: String,
    proxy: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client, optionally routed through a proxy URL
    pub fn new(user_agent: Option<String>, timeout_secs: Option<u64>, proxy: Option<String>) -> ReconResult<Self> {
        let user_agent = user_agent.unwrap_or_else(|| format!("reconflow/{}", env!("CARGO_PKG_VERSION")));
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(30));

        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(&user_agent);

        if let Some(proxy_url) = &proxy {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| ReconError::ConfigError(format!("Invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ReconError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, user_agent, proxy })
    }

    /// Build the client described by the global configuration
    pub fn from_config(config: &Config) -> ReconResult<Self> {
        Self::new(
            Some(config.global.user_agent.clone()),
            Some(config.global.fetch_timeout_secs),
            config.global.proxy.as_ref().map(|p| p.url()),
        )
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> ReconResult<Response> {
        debug!("GET {}", url);

        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| ReconError::NetworkError(format!("Failed to GET {}: {}", url, e)))
    }

    /// Get the user agent
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Proxy URL in use, if any
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }
}
