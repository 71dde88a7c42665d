// src/modules/mod.rs
//! Collector modules shipped with the crate.

pub mod dns_resolve;
pub mod http_headers;
pub mod storage;

use crate::core::ModuleRegistry;

/// Name of the persistence listener every scan includes
pub const STORAGE_MODULE: &str = storage::NAME;

/// Register every built-in module
pub fn register_builtin(registry: &mut ModuleRegistry) {
    registry.register(storage::NAME, storage::create);
    registry.register(dns_resolve::NAME, dns_resolve::create);
    registry.register(http_headers::NAME, http_headers::create);
}
