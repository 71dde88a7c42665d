mod dispatch;
mod event;
mod module;
mod registry;
mod router;
mod scanner;
mod target;
mod worker_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use event::{Ancestor, Event, EventScores, LINEAGE_HOPS, ROOT_EVENT_HASH, ROOT_EVENT_TYPE};
pub use module::{Delivery, Interest, Module, ModuleContext, ModuleHandle, ModuleMetadata};
pub use registry::{ModuleConstructor, ModuleRegistry};
pub use router::{repeats_lineage, RouteOutcome, Router};
pub use scanner::{ScanRequest, ScanSummary, Scanner, SEED_MODULE};
pub use target::{Target, TargetAlias, TargetType};
pub use worker_pool::WorkerPool;
