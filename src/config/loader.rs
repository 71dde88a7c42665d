use std::path::{Path, PathBuf};
use config::{Config as ConfigLoader, FileFormat};
use tracing::{info, warn};

use super::schema::Config;
use crate::error::{ReconResult, ReconError};

/// Load configuration from the built-in defaults, an optional file and the environment
pub fn load_config(config_path: Option<&Path>) -> ReconResult<Config> {
    let mut config_builder = ConfigLoader::builder();

    // Default configuration
    config_builder = config_builder.add_source(
        config::File::from_str(
            include_str!("../../config/default.toml"),
            FileFormat::Toml
        )
    );

    // User-provided configuration
    if let Some(path) = config_path {
        if path.exists() {
            info!("Loading user configuration from: {}", path.display());
            config_builder = config_builder.add_source(config::File::from(path));
        } else {
            warn!("Specified configuration file not found: {}", path.display());
        }
    } else {
        let default_path = get_default_config_path();
        if default_path.exists() {
            info!("Loading default configuration from: {}", default_path.display());
            config_builder = config_builder.add_source(config::File::from(default_path.as_path()));
        }
    }

    // Environment variables, e.g. RECONFLOW_GLOBAL__MAX_THREADS=4
    config_builder = config_builder.add_source(
        config::Environment::with_prefix("RECONFLOW")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    );

    let config: Config = config_builder
        .build()
        .map_err(|e| ReconError::ConfigError(format!("Failed to build configuration: {}", e)))?
        .try_deserialize()
        .map_err(|e| ReconError::ConfigError(format!("Failed to parse configuration: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> ReconResult<()> {
    if config.global.max_threads == 0 {
        return Err(ReconError::ConfigError("global.max_threads must be at least 1".to_string()));
    }
    if config.global.module_max_threads == 0 {
        return Err(ReconError::ConfigError("global.module_max_threads must be at least 1".to_string()));
    }
    if config.scan.finalize_passes == 0 {
        return Err(ReconError::ConfigError("scan.finalize_passes must be at least 1".to_string()));
    }
    Ok(())
}

/// Get the default configuration path
pub fn get_default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reconflow/config.toml")
}

/// Write the default configuration to the default location
pub fn init_config(force: bool) -> ReconResult<PathBuf> {
    let config_path = get_default_config_path();

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ReconError::FileError {
                path: parent.to_path_buf(),
                message: format!("Failed to create directory: {}", e),
            })?;
    }

    if config_path.exists() && !force {
        return Err(ReconError::ConfigError(format!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let config = load_config(None)?;
    config.save(&config_path)?;

    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_defaults_load() {
        let config = load_config(Some(Path::new("/nonexistent/reconflow.toml"))).unwrap();

        assert_eq!(config.scan.finalize_passes, 3);
        assert_eq!(config.global.module_max_threads, 1);
        assert_eq!(config.modules.get("stor_db").and_then(|m| m.priority), Some(0));
        assert!(config.correlation.enabled);
        assert!(!config.correlation.rules.is_empty());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[global]\nmax_threads = 2\ndns_server = \"9.9.9.9\"\n\n[scan]\nfinalize_passes = 5").unwrap();

        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.global.max_threads, 2);
        assert_eq!(config.global.dns_server.as_deref(), Some("9.9.9.9"));
        assert_eq!(config.scan.finalize_passes, 5);
        // untouched keys keep their defaults
        assert_eq!(config.scan.idle_backoff_ms, 50);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[global]\nmax_threads = 0").unwrap();

        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ReconError::ConfigError(_))));
    }
}
