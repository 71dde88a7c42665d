// src/main.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn, Level};

use reconflow::store::ScanExport;
use reconflow::{
    export_scan, Config, MemoryStore, ModuleRegistry, RuleCorrelator, ScanRequest,
    Scanner, TargetType,
};

#[derive(Parser)]
#[command(name = "reconflow")]
#[command(about = "An event-driven reconnaissance scan engine")]
struct Args {
    #[command(subcommand)]
    command: Cli,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cli {
    /// Run a scan against a single target
    Scan {
        #[arg(short, long, help = "Scan name")]
        name: String,

        #[arg(short, long, help = "Target value")]
        target: String,

        #[arg(long = "type", help = "Target type (detected when omitted)")]
        target_type: Option<String>,

        #[arg(short, long, value_delimiter = ',', required = true, help = "Modules to run (comma-separated)")]
        modules: Vec<String>,

        #[arg(short = 'O', long = "option", help = "Option as key=value, or module:key=value")]
        options: Vec<String>,

        #[arg(short, long, help = "Write the scan as JSON to this file")]
        output: Option<PathBuf>,
    },

    /// List available modules
    Modules,

    /// Initialize config
    Init {
        #[arg(short, long, help = "Force overwrite existing configuration")]
        force: bool,
    },
}

/// Split `key=value`; the value is read as JSON when it parses, else as a string
fn parse_option(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("option '{}' is not in key=value form", raw))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("option '{}' has an empty key", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

fn print_summary(export: &ScanExport) {
    println!("Scan {} ({}) {}", export.scan.name, export.scan.id, export.scan.status);
    for (event_type, count) in export.type_counts() {
        println!("  {:<28} {}", event_type, count);
    }
    for correlation in &export.correlations {
        println!("  [{}] {}", correlation.risk, correlation.title);
    }
}

async fn run_scan(
    config: Config,
    name: String,
    target: String,
    target_type: Option<String>,
    modules: Vec<String>,
    options: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let target_type = target_type
        .map(|t| t.parse::<TargetType>())
        .transpose()
        .context("Invalid target type")?;
    let options = options
        .iter()
        .map(|raw| parse_option(raw))
        .collect::<Result<HashMap<_, _>>>()?;

    let config = Arc::new(config);
    let store = Arc::new(MemoryStore::new());
    let request = ScanRequest { name, target, target_type, modules, options };

    let mut scanner = Scanner::new(request, config.clone(), Arc::new(ModuleRegistry::with_builtin()), store.clone())
        .await
        .context("Failed to create scan")?;
    if config.correlation.enabled {
        scanner = scanner.with_correlator(Arc::new(RuleCorrelator::new()));
    }

    let abort = scanner.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting scan");
            abort.cancel();
        }
    });

    let scan_id = scanner.id().to_string();
    info!("Starting scan {}", scan_id);
    let outcome = scanner.run().await;

    let export = match &output {
        Some(path) => export_scan(store.as_ref(), &scan_id, path).await?,
        None => ScanExport::collect(store.as_ref(), &scan_id).await?,
    };
    print_summary(&export);

    let summary = outcome.context("Scan failed")?;
    if !summary.excluded.is_empty() {
        warn!("Modules excluded from the scan: {}", summary.excluded.join(", "));
    }
    summary.ensure_finished()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if let Cli::Init { force } = args.command {
        let path = Config::init(force)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match args.command {
        Cli::Scan { name, target, target_type, modules, options, output } => {
            run_scan(config, name, target, target_type, modules, options, output).await
        }
        Cli::Modules => {
            for module in ModuleRegistry::with_builtin().list() {
                let priority = config
                    .module(&module.name)
                    .and_then(|m| m.priority)
                    .unwrap_or(module.priority);
                println!(
                    "{:<16} priority {}  [{}]  {}",
                    module.name,
                    priority,
                    module.categories.join(", "),
                    module.description
                );
            }
            Ok(())
        }
        Cli::Init { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option_values() {
        assert_eq!(parse_option("http_headers:https=false").unwrap(), ("http_headers:https".to_string(), Value::from(false)));
        assert_eq!(parse_option("depth=3").unwrap(), ("depth".to_string(), Value::from(3)));
        assert_eq!(parse_option("agent=curl/8").unwrap(), ("agent".to_string(), Value::from("curl/8")));
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=1").is_err());
    }
}
