// src/core/scanner.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::dispatch::{DispatchOutcome, Dispatcher};
use crate::core::event::Event;
use crate::core::module::{Module, ModuleContext, ModuleHandle};
use crate::core::registry::ModuleRegistry;
use crate::core::router::Router;
use crate::core::target::{Target, TargetType};
use crate::core::worker_pool::WorkerPool;
use crate::correlation::Correlator;
use crate::error::{ReconResult, ReconError};
use crate::modules::STORAGE_MODULE;
use crate::store::{ScanStatus, ScanStore};
use crate::utils::http::HttpClient;

/// Module name stamped on the seeded target event
pub const SEED_MODULE: &str = "reconflow";

/// What to scan and with which modules
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub name: String,
    pub target: String,
    /// Detected from the value when absent
    pub target_type: Option<TargetType>,
    pub modules: Vec<String>,
    /// `module:key` entries reach only that module, an entry named after a
    /// module must hold an object of its options, anything else reaches
    /// every module.
    pub options: HashMap<String, Value>,
}

/// How a scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub scan_id: String,
    pub status: ScanStatus,
    /// Requested modules that could not be constructed or set up
    pub excluded: Vec<String>,
    /// Modules forcibly detached because they never drained
    pub detached: Vec<String>,
    pub routed_events: u64,
}

impl ScanSummary {
    /// Ok only for a FINISHED scan. An aborted scan maps to
    /// [`ReconError::AbortRequested`].
    pub fn ensure_finished(&self) -> ReconResult<()> {
        match self.status {
            ScanStatus::Finished => Ok(()),
            ScanStatus::Aborted | ScanStatus::AbortRequested => {
                Err(ReconError::AbortRequested(self.scan_id.clone()))
            }
            status => Err(ReconError::OrchestrationError(format!(
                "scan {} ended with status {}",
                self.scan_id, status
            ))),
        }
    }
}

struct Wiring {
    router: Router,
    events: mpsc::UnboundedReceiver<Arc<Event>>,
    pool: Arc<WorkerPool>,
    stop: CancellationToken,
    target: Arc<Target>,
    excluded: Vec<String>,
}

/// Drives one scan from INITIALIZING to a terminal state
pub struct Scanner {
    id: String,
    name: String,
    target: Target,
    modules: Vec<String>,
    options: HashMap<String, Value>,
    config: Arc<Config>,
    registry: Arc<ModuleRegistry>,
    store: Arc<dyn ScanStore>,
    correlator: Option<Arc<dyn Correlator>>,
    abort: CancellationToken,
}

impl Scanner {
    /// Validate the request and persist a new scan record
    pub async fn new(
        request: ScanRequest,
        config: Arc<Config>,
        registry: Arc<ModuleRegistry>,
        store: Arc<dyn ScanStore>,
    ) -> ReconResult<Self> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ReconError::ConfigError("scan name is empty".to_string()));
        }
        if request.target.trim().is_empty() {
            return Err(ReconError::ConfigError("scan target is empty".to_string()));
        }

        let mut modules = Vec::new();
        for module in request.modules.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
            if !modules.iter().any(|m| m == module) {
                modules.push(module.to_string());
            }
        }
        if modules.is_empty() {
            return Err(ReconError::ConfigError("no modules requested".to_string()));
        }

        let target = match request.target_type {
            Some(target_type) => Target::new(request.target.trim(), target_type),
            None => Target::detect(&request.target),
        }
        .map_err(|e| ReconError::ConfigError(format!("invalid target: {}", e)))?;

        let id = Uuid::new_v4().to_string();
        store.create_scan(&id, &name, &target).await?;
        info!("Created scan {} ({}) against {} {}", id, name, target.target_type(), target.value());

        Ok(Self {
            id,
            name,
            target,
            modules,
            options: request.options,
            config,
            registry,
            store,
            correlator: None,
            abort: CancellationToken::new(),
        })
    }

    /// Run the given correlator after a scan finishes cleanly
    pub fn with_correlator(mut self, correlator: Arc<dyn Correlator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Cancelling this token aborts the scan as if interrupted
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Execute the scan to completion.
    ///
    /// Aborts are reported through the summary status. Startup and dispatch
    /// failures are persisted as ERROR-FAILED and returned as errors.
    pub async fn run(self) -> ReconResult<ScanSummary> {
        self.set_status(ScanStatus::Starting, Some(Utc::now()), None).await?;

        let wiring = match self.wire().await {
            Ok(wiring) => wiring,
            Err(e) => {
                error!("Scan {} failed to start: {}", self.id, e);
                self.set_status(ScanStatus::ErrorFailed, None, Some(Utc::now())).await?;
                return Err(e);
            }
        };
        let Wiring { router, events, pool, stop, target, excluded } = wiring;

        self.set_status(ScanStatus::Running, None, None).await?;
        if let Err(e) = seed(&router, &target) {
            stop.cancel();
            pool.shutdown(false).await;
            self.set_status(ScanStatus::ErrorFailed, None, Some(Utc::now())).await?;
            return Err(e);
        }

        let dispatcher = Dispatcher::new(
            self.id.clone(),
            events,
            router,
            self.store.clone(),
            self.config.scan.clone(),
            self.abort.clone(),
        );
        let outcome = match tokio::spawn(dispatcher.run()).await {
            Ok(result) => result,
            Err(e) => Err(ReconError::OrchestrationError(format!("dispatch loop crashed: {}", e))),
        };
        stop.cancel();

        let mut summary = ScanSummary {
            scan_id: self.id.clone(),
            status: ScanStatus::ErrorFailed,
            excluded,
            detached: Vec::new(),
            routed_events: 0,
        };

        match outcome {
            Ok(DispatchOutcome::Completed { passes, routed, detached }) => {
                pool.shutdown(detached.is_empty()).await;
                debug!("Scan {} drained after {} finalize passes", self.id, passes);
                summary.routed_events = routed;
                summary.detached = detached;
                summary.status = match self.correlate().await {
                    Ok(()) => ScanStatus::Finished,
                    Err(e) => {
                        error!("Correlation failed for scan {}: {}", self.id, e);
                        self.set_status(ScanStatus::ErrorFailed, None, Some(Utc::now())).await?;
                        return Err(e);
                    }
                };
            }
            Ok(DispatchOutcome::Aborted { reason }) => {
                warn!("Scan {} aborted: {}", self.id, reason);
                pool.shutdown(false).await;
                summary.status = ScanStatus::Aborted;
            }
            Err(e) => {
                error!("Scan {} failed: {}", self.id, e);
                pool.shutdown(false).await;
                self.set_status(ScanStatus::ErrorFailed, None, Some(Utc::now())).await?;
                return Err(e);
            }
        }

        self.set_status(summary.status, None, Some(Utc::now())).await?;
        info!("Scan {} ended with status {}", self.id, summary.status);
        Ok(summary)
    }

    async fn set_status(
        &self,
        status: ScanStatus,
        started: Option<chrono::DateTime<Utc>>,
        ended: Option<chrono::DateTime<Utc>>,
    ) -> ReconResult<()> {
        debug!("Scan {} -> {}", self.id, status);
        self.store.set_status(&self.id, status, started, ended).await
    }

    /// Instantiate, configure and connect every requested module
    async fn wire(&self) -> ReconResult<Wiring> {
        let global = &self.config.global;
        let pool = Arc::new(WorkerPool::new(global.max_threads, global.module_max_threads));
        let (tx, events) = mpsc::unbounded_channel();
        let stop = self.abort.child_token();
        let http = HttpClient::from_config(&self.config)?;
        let output_filter = global
            .output_filter
            .as_ref()
            .map(|types| types.iter().cloned().collect::<HashSet<String>>());

        let mut names = self.modules.clone();
        if !names.iter().any(|n| n == STORAGE_MODULE) && self.registry.contains(STORAGE_MODULE) {
            names.push(STORAGE_MODULE.to_string());
        }

        let mut excluded = Vec::new();
        let mut survivors: Vec<(Box<dyn Module>, ModuleContext)> = Vec::new();
        for name in &names {
            match self.start_module(name, &tx, output_filter.clone(), stop.clone(), http.clone()).await {
                Ok(started) => survivors.push(started),
                Err(e) => {
                    warn!("Excluding module {}: {}", name, e);
                    excluded.push(name.clone());
                }
            }
        }
        if survivors.is_empty() {
            return Err(ReconError::ConfigError("no modules could be started".to_string()));
        }

        let mut target = self.target.clone();
        for (module, ctx) in &survivors {
            if ctx.error_state() {
                continue;
            }
            for alias in module.enrich_target(ctx, &target).await {
                if target.add_alias(alias.clone()) {
                    debug!("{} added target alias {} ({})", ctx.module_name(), alias.value, alias.alias_type);
                }
            }
        }
        let target = Arc::new(target);

        let mut handles = Vec::with_capacity(survivors.len());
        for (module, ctx) in survivors {
            ctx.bind_target(target.clone());
            let name = ctx.module_name().to_string();
            let overrides = self.config.module(&name);
            let priority = overrides
                .and_then(|o| o.priority)
                .unwrap_or(module.metadata().priority);
            if let Some(limit) = overrides.and_then(|o| o.max_threads) {
                pool.set_task_limit(&name, limit);
            }
            handles.push(Arc::new(ModuleHandle::new(Arc::from(module), Arc::new(ctx), pool.clone(), priority)));
        }

        let router = Router::new(handles, stop.clone());
        info!(
            "Scan {} wired {} modules: {}",
            self.id,
            router.listeners().len(),
            router.listeners().iter().map(|l| l.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Wiring { router, events, pool, stop, target, excluded })
    }

    async fn start_module(
        &self,
        name: &str,
        outgoing: &UnboundedSender<Arc<Event>>,
        output_filter: Option<HashSet<String>>,
        stop: CancellationToken,
        http: HttpClient,
    ) -> ReconResult<(Box<dyn Module>, ModuleContext)> {
        let mut module = self.registry.create(name)?;
        let options = self.module_options(name, module.default_options());

        let ctx = ModuleContext::new(
            name,
            self.id.clone(),
            options,
            outgoing.clone(),
            output_filter,
            stop,
            self.store.clone(),
            http,
        );
        module.setup(&ctx).await.map_err(|e| ReconError::ModuleInitError {
            module: name.to_string(),
            message: e.to_string(),
        })?;
        if ctx.error_state() {
            warn!("Module {} is in error state after setup and will receive no events", name);
        }
        Ok((module, ctx))
    }

    /// Module defaults, then configured options, then request options, with
    /// the global `_` options on top.
    fn module_options(&self, name: &str, defaults: HashMap<String, Value>) -> HashMap<String, Value> {
        let mut options = defaults;
        if let Some(configured) = self.config.module(name) {
            options.extend(configured.options.clone());
        }

        let prefix = format!("{}:", name);
        for (key, value) in &self.options {
            if let Some(option) = key.strip_prefix(&prefix) {
                options.insert(option.to_string(), value.clone());
            } else if key == name {
                match value {
                    Value::Object(map) => {
                        options.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    other => warn!("Ignoring malformed options for module {}: {}", name, other),
                }
            } else if !key.contains(':') && !self.modules.iter().any(|m| m == key) {
                options.insert(key.clone(), value.clone());
            }
        }

        options.extend(self.config.global_options());
        options
    }

    async fn correlate(&self) -> ReconResult<()> {
        let Some(correlator) = &self.correlator else {
            return Ok(());
        };
        if !self.config.correlation.enabled {
            debug!("Correlation disabled, skipping");
            return Ok(());
        }
        let results = correlator
            .run(self.store.clone(), &self.config.correlation.rules, &self.id)
            .await?;
        info!("Scan {} produced {} correlation results", self.id, results.len());
        Ok(())
    }
}

/// Fan out the ROOT event and then the first target-typed event
fn seed(router: &Router, target: &Target) -> ReconResult<()> {
    let root = Arc::new(Event::root(target.value()));
    router.route(&root);

    let first = Event::new(target.target_type().as_str(), target.value(), SEED_MODULE, root)?;
    router.route(&Arc::new(first));
    Ok(())
}
