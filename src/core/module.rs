// src/core/module.rs
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::event::{Event, ROOT_EVENT_TYPE};
use crate::core::target::{Target, TargetAlias};
use crate::core::worker_pool::WorkerPool;
use crate::error::{ReconResult, ReconError};
use crate::store::ScanStore;
use crate::utils::http::HttpClient;

/// Descriptive information about a module
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModuleMetadata {
    pub name: String,
    pub description: String,
    /// Lower runs earlier
    pub priority: u32,
    pub categories: Vec<String>,
}

impl ModuleMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            priority: 3,
            categories: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Event types a module consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Every event type
    Any,
    Types(HashSet<String>),
}

impl Interest {
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Interest::Types(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Interest::Any => true,
            Interest::Types(types) => types.contains(event_type),
        }
    }
}

/// Contract every collector unit implements.
///
/// The scanner calls `setup` once, asks for `enrich_target` aliases, then
/// delivers matching events to `handle_event` one at a time (per the
/// module's concurrency limit). `finish` runs when the scan goes quiet and
/// may emit further events.
#[async_trait]
pub trait Module: Send + Sync {
    fn metadata(&self) -> &ModuleMetadata;

    /// One-time initialisation. An `Err` excludes the module from the scan;
    /// to stay wired but inert, call [`ModuleContext::set_error_state`] instead.
    async fn setup(&mut self, _ctx: &ModuleContext) -> ReconResult<()> {
        Ok(())
    }

    fn watched_events(&self) -> Interest;

    /// Informational only, routing does not enforce it
    fn produced_events(&self) -> Vec<String> {
        Vec::new()
    }

    /// Default values for this module's options
    fn default_options(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Extra names the target is known by, gathered before the run starts
    async fn enrich_target(&self, _ctx: &ModuleContext, _target: &Target) -> Vec<TargetAlias> {
        Vec::new()
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> ReconResult<()>;

    /// Runs once per finalize pass after the scan went quiet
    async fn finish(&self, _ctx: &ModuleContext) -> ReconResult<()> {
        Ok(())
    }

    /// The designated persistence listener also receives store-only events
    fn is_persistence(&self) -> bool {
        false
    }
}

/// Everything a module instance can reach while it runs: its options, the
/// shared store and HTTP client, the outbound event queue and the stop flag.
pub struct ModuleContext {
    module: String,
    scan_id: String,
    options: HashMap<String, Value>,
    target: OnceCell<Arc<Target>>,
    outgoing: UnboundedSender<Arc<Event>>,
    output_filter: Option<HashSet<String>>,
    stop: CancellationToken,
    error_state: AtomicBool,
    store: Arc<dyn ScanStore>,
    http: HttpClient,
}

impl ModuleContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        module: impl Into<String>,
        scan_id: impl Into<String>,
        options: HashMap<String, Value>,
        outgoing: UnboundedSender<Arc<Event>>,
        output_filter: Option<HashSet<String>>,
        stop: CancellationToken,
        store: Arc<dyn ScanStore>,
        http: HttpClient,
    ) -> Self {
        Self {
            module: module.into(),
            scan_id: scan_id.into(),
            options,
            target: OnceCell::new(),
            outgoing,
            output_filter,
            stop,
            error_state: AtomicBool::new(false),
            store,
            http,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn options(&self) -> &HashMap<String, Value> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        self.options.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The scan target; bound once alias enrichment is complete
    pub fn target(&self) -> ReconResult<&Arc<Target>> {
        self.target
            .get()
            .ok_or_else(|| ReconError::module(&self.module, "target is not bound yet"))
    }

    pub(crate) fn bind_target(&self, target: Arc<Target>) {
        if self.target.set(target).is_err() {
            warn!("Target already bound for module {}", self.module);
        }
    }

    /// Flag the module as broken; it receives no further events this scan
    pub fn set_error_state(&self) {
        if !self.error_state.swap(true, Ordering::SeqCst) {
            warn!("Module {} entered error state", self.module);
        }
    }

    pub fn error_state(&self) -> bool {
        self.error_state.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation poll for long-running module work
    pub fn check_for_stop(&self) -> bool {
        self.stop.is_cancelled() || self.error_state()
    }

    /// Resolves once the scan asks modules to stop
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Publish an event produced by this module.
    ///
    /// Dropped when the scan is stopping, when the payload is empty, or
    /// when an output filter is set and the type is neither in it nor the
    /// ROOT or target type. Lineage suppression happens in the router.
    pub fn notify(&self, event: Event) {
        if self.check_for_stop() {
            debug!("{} stopping, dropping {} event", self.module, event.event_type());
            return;
        }
        if event.data().is_empty() {
            debug!("{} emitted an empty {} event, dropping", self.module, event.event_type());
            return;
        }
        if !self.passes_output_filter(event.event_type()) {
            debug!("{} event from {} is outside the output filter", event.event_type(), self.module);
            return;
        }
        if self.outgoing.send(Arc::new(event)).is_err() {
            debug!("Event queue closed, {} notification dropped", self.module);
        }
    }

    fn passes_output_filter(&self, event_type: &str) -> bool {
        let Some(filter) = &self.output_filter else {
            return true;
        };
        if filter.contains(event_type) || event_type == ROOT_EVENT_TYPE {
            return true;
        }
        self.target
            .get()
            .map(|t| t.target_type().as_str() == event_type)
            .unwrap_or(false)
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .field("scan_id", &self.scan_id)
            .field("error_state", &self.error_state())
            .field("stopping", &self.stop.is_cancelled())
            .finish()
    }
}

/// An item on a module's private input queue
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Arc<Event>),
    /// Quiescence reached, run finalisation
    Finished,
}

/// A wired module instance: the module itself, its context, its private
/// FIFO input queue and the pool it executes on.
///
/// Module calls run on the runtime's blocking threads, so a module that
/// blocks synchronously only ties up its own pool slot.
pub struct ModuleHandle {
    name: String,
    priority: u32,
    interest: Interest,
    persistence: bool,
    module: Arc<dyn Module>,
    ctx: Arc<ModuleContext>,
    queue: Mutex<VecDeque<Delivery>>,
    pool: Arc<WorkerPool>,
    detached: AtomicBool,
    /// Cancelled on detach to drop the call in flight
    released: CancellationToken,
    completed: AtomicU64,
}

impl ModuleHandle {
    pub fn new(
        module: Arc<dyn Module>,
        ctx: Arc<ModuleContext>,
        pool: Arc<WorkerPool>,
        priority: u32,
    ) -> Self {
        Self {
            name: ctx.module_name().to_string(),
            priority,
            interest: module.watched_events(),
            persistence: module.is_persistence(),
            module,
            ctx,
            queue: Mutex::new(VecDeque::new()),
            pool,
            detached: AtomicBool::new(false),
            released: CancellationToken::new(),
            completed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    pub fn is_persistence(&self) -> bool {
        self.persistence
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn context(&self) -> &Arc<ModuleContext> {
        &self.ctx
    }

    pub fn error_state(&self) -> bool {
        self.ctx.error_state()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Still eligible to receive deliveries
    pub fn is_active(&self) -> bool {
        !self.error_state() && !self.is_detached()
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        self.interest.matches(event_type)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Deliveries this module has finished with, whatever the outcome
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Work is queued for this module or executing right now
    pub fn is_busy(&self) -> bool {
        if self.is_detached() {
            return false;
        }
        self.pool.queued_count(&self.name) > 0 || self.pending() > 0
    }

    /// Append to the private queue and schedule processing on the pool.
    /// Returns false when the module no longer takes deliveries.
    pub fn deliver(self: &Arc<Self>, delivery: Delivery) -> bool {
        if !self.is_active() {
            return false;
        }
        self.queue.lock().push_back(delivery);

        let handle = Arc::clone(self);
        self.pool.submit(&self.name, async move {
            handle.process_next().await;
        });
        true
    }

    /// Stop delivering to this module and drop its backlog
    pub fn detach(&self) {
        if let Some(dropped) = self.release() {
            warn!("Module {} detached with {} undelivered items", self.name, dropped);
        }
    }

    /// Refuse further deliveries, drop the backlog and cancel the call in
    /// flight. Returns the dropped backlog size on the first call only.
    pub(crate) fn release(&self) -> Option<usize> {
        if self.detached.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.released.cancel();
        Some(self.clear_queue())
    }

    fn clear_queue(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    fn fail(&self, message: String) {
        self.ctx.set_error_state();
        let dropped = self.clear_queue();
        error!(
            "Module {} failed: {} ({} queued items dropped)",
            self.name, message, dropped
        );
    }

    async fn process_next(self: Arc<Self>) {
        let Some(delivery) = self.queue.lock().pop_front() else {
            return;
        };
        if self.error_state() || self.ctx.stop.is_cancelled() {
            return;
        }

        let module = self.module.clone();
        let ctx = self.ctx.clone();
        let released = self.released.clone();
        let runtime = Handle::current();
        let outcome = tokio::task::spawn_blocking(move || {
            runtime.block_on(async move {
                let call = async {
                    match delivery {
                        Delivery::Event(event) => module.handle_event(&ctx, event).await,
                        Delivery::Finished => module.finish(&ctx).await,
                    }
                };
                tokio::select! {
                    result = call => result,
                    _ = released.cancelled() => Ok(()),
                }
            })
        })
        .await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(e.to_string()),
            Err(e) if e.is_panic() => self.fail("panicked while handling an event".to_string()),
            Err(e) => self.fail(e.to_string()),
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("interest", &self.interest)
            .field("pending", &self.pending())
            .field("error_state", &self.error_state())
            .field("detached", &self.is_detached())
            .finish()
    }
}
