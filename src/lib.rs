pub mod config;
pub mod core;
pub mod correlation;
pub mod error;
pub mod modules;
pub mod store;
pub mod utils;

// Re-export main types for easier access
pub use config::Config;
pub use core::{
    Event,
    Module,
    ModuleContext,
    ModuleRegistry,
    ScanRequest,
    ScanSummary,
    Scanner,
    Target,
    TargetType,
};
pub use correlation::{CorrelationRule, Correlator, RuleCorrelator};
pub use error::{ReconError, ReconResult};
pub use store::{export_scan, MemoryStore, ScanStatus, ScanStore};
