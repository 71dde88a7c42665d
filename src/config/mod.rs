// src/config/mod.rs
mod loader;
mod schema;

use std::path::{Path, PathBuf};

pub use loader::get_default_config_path;
pub use schema::{
    Config, GlobalConfig, ModuleConfig, ProxyConfig,
    ScanSettings, CorrelationConfig
};

use crate::error::ReconResult;

/// Centralized configuration handling
impl Config {
    /// Load configuration from a file or fall back to the built-in defaults
    pub fn load(config_path: Option<&Path>) -> ReconResult<Self> {
        loader::load_config(config_path)
    }

    /// Write the default configuration to `~/.reconflow/config.toml`
    pub fn init(force: bool) -> ReconResult<PathBuf> {
        loader::init_config(force)
    }

    /// Look up the override block for a module, if any
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.get(name)
    }
}
