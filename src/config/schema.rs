use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::correlation::CorrelationRule;
use crate::error::{ReconResult, ReconError};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub modules: HashMap<String, ModuleConfig>,
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

/// Settings shared by every module in a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Pool-wide ceiling on concurrently executing module calls
    pub max_threads: usize,
    /// Default per-module concurrency cap
    #[serde(default = "default_module_max_threads")]
    pub module_max_threads: usize,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub dns_server: Option<String>,
    /// Restrict what modules may emit to these event types
    #[serde(default)]
    pub output_filter: Option<Vec<String>>,
}

/// Outbound proxy applied to module HTTP traffic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    pub kind: String,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// Render as a proxy URL, e.g. `socks5h://127.0.0.1:9050`
    pub fn url(&self) -> String {
        let scheme = match self.kind.to_lowercase().as_str() {
            "socks4" => "socks4",
            "socks5" => "socks5h",
            "https" => "https",
            _ => "http",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Dispatch loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    pub finalize_passes: usize,
    pub drain_timeout_secs: u64,
    pub abort_poll_interval: u64,
    pub idle_backoff_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            finalize_passes: 3,
            drain_timeout_secs: 120,
            abort_poll_interval: 50,
            idle_backoff_ms: 50,
        }
    }
}

/// Per-module overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub max_threads: Option<usize>,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

/// Post-scan correlation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<CorrelationRule>,
}

fn default_module_max_threads() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig {
                max_threads: num_cpus::get().max(3),
                module_max_threads: default_module_max_threads(),
                user_agent: format!("reconflow/{}", env!("CARGO_PKG_VERSION")),
                fetch_timeout_secs: 5,
                proxy: None,
                dns_server: None,
                output_filter: None,
            },
            scan: ScanSettings::default(),
            modules: HashMap::new(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl Config {
    /// Options every module sees, keyed with a leading underscore
    pub fn global_options(&self) -> HashMap<String, Value> {
        let mut options = HashMap::new();
        options.insert("_useragent".to_string(), Value::from(self.global.user_agent.clone()));
        options.insert("_fetchtimeout".to_string(), Value::from(self.global.fetch_timeout_secs));
        options.insert("_maxthreads".to_string(), Value::from(self.global.max_threads));
        if let Some(dns) = &self.global.dns_server {
            options.insert("_dnsserver".to_string(), Value::from(dns.clone()));
        }
        if let Some(proxy) = &self.global.proxy {
            options.insert("_proxy".to_string(), Value::from(proxy.url()));
        }
        options
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ReconResult<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| ReconError::SerializationError(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, config_str)
            .map_err(|e| ReconError::FileError {
                path: path.to_path_buf(),
                message: format!("Failed to write configuration: {}", e),
            })?;
        Ok(())
    }
}
