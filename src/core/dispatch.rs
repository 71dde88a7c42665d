// src/core/dispatch.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanSettings;
use crate::core::event::Event;
use crate::core::module::ModuleHandle;
use crate::core::router::Router;
use crate::error::{ReconResult, ReconError};
use crate::store::{ScanStatus, ScanStore};

/// How the dispatch loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed {
        passes: usize,
        routed: u64,
        detached: Vec<String>,
    },
    Aborted {
        reason: String,
    },
}

/// The single consumer of the shared event queue
pub struct Dispatcher {
    scan_id: String,
    events: UnboundedReceiver<Arc<Event>>,
    router: Router,
    store: Arc<dyn ScanStore>,
    settings: ScanSettings,
    abort: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        scan_id: impl Into<String>,
        events: UnboundedReceiver<Arc<Event>>,
        router: Router,
        store: Arc<dyn ScanStore>,
        settings: ScanSettings,
        abort: CancellationToken,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            events,
            router,
            store,
            settings,
            abort,
        }
    }

    /// Route events until every module has drained through the configured
    /// number of finalize passes, or until an abort is observed. Unless the
    /// scan completed, every module is released before this returns so no
    /// queued work runs after the stop.
    pub async fn run(mut self) -> ReconResult<DispatchOutcome> {
        let result = self.drive().await;
        if !matches!(result, Ok(DispatchOutcome::Completed { .. })) {
            self.halt();
        }
        result
    }

    async fn drive(&mut self) -> ReconResult<DispatchOutcome> {
        let backoff = Duration::from_millis(self.settings.idle_backoff_ms.max(1));
        let drain_timeout = Duration::from_secs(self.settings.drain_timeout_secs);
        let poll_interval = self.settings.abort_poll_interval.max(1);
        let max_passes = self.settings.finalize_passes.max(1);

        let mut iterations: u64 = 0;
        let mut routed: u64 = 0;
        let mut passes = 0usize;
        let mut progress: HashMap<String, (u64, Instant)> = HashMap::new();
        let mut quiet = false;
        let mut detached = Vec::new();

        loop {
            iterations += 1;

            if self.abort.is_cancelled() {
                return Ok(DispatchOutcome::Aborted { reason: "interrupted".to_string() });
            }
            if iterations % poll_interval == 0 && self.abort_requested().await? {
                return Ok(DispatchOutcome::Aborted { reason: "abort requested".to_string() });
            }

            match self.events.try_recv() {
                Ok(event) => {
                    let outcome = self.router.route(&event);
                    debug!(
                        "Routed {} event from {} to {} modules",
                        event.event_type(), event.module(), outcome.delivered
                    );
                    routed += 1;
                    quiet = false;
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(ReconError::OrchestrationError("event queue closed unexpectedly".to_string()));
                }
                Err(TryRecvError::Empty) => {}
            }

            let busy = self.busy_modules();
            if !busy.is_empty() {
                quiet = false;
                // No deadline applies until finalisation has started.
                if passes > 0 {
                    let stalled = stalled_modules(&busy, &mut progress, drain_timeout);
                    if !stalled.is_empty() {
                        for handle in &stalled {
                            warn!(
                                "Module {} made no progress for {:?} during finalize pass {}, detaching",
                                handle.name(), drain_timeout, passes
                            );
                            handle.detach();
                            detached.push(handle.name().to_string());
                        }
                        continue;
                    }
                }
                self.idle(backoff).await;
                continue;
            }

            // A worker may be about to notify; only trust quiet seen twice.
            if !quiet {
                quiet = true;
                self.idle(backoff).await;
                continue;
            }
            quiet = false;

            if passes >= max_passes {
                break;
            }
            passes += 1;
            progress.clear();
            let notified = self.router.broadcast_finished();
            info!(
                "Scan {} is quiet, finalize pass {}/{} sent to {} modules",
                self.scan_id, passes, max_passes, notified
            );
        }

        info!("Scan {} completed after {} routed events", self.scan_id, routed);
        Ok(DispatchOutcome::Completed { passes, routed, detached })
    }

    /// Release every module, dropping whatever is still queued
    fn halt(&self) {
        let dropped: usize = self
            .router
            .listeners()
            .iter()
            .filter_map(|handle| handle.release())
            .sum();
        debug!("Scan {} halted with {} undelivered items", self.scan_id, dropped);
    }

    fn busy_modules(&self) -> Vec<Arc<ModuleHandle>> {
        self.router
            .listeners()
            .iter()
            .filter(|l| l.is_busy())
            .cloned()
            .collect()
    }

    async fn abort_requested(&self) -> ReconResult<bool> {
        let status = self
            .store
            .scan_status(&self.scan_id)
            .await
            .map_err(|e| ReconError::OrchestrationError(format!("status poll failed: {}", e)))?;
        if status == ScanStatus::AbortRequested {
            info!("Scan {} abort requested", self.scan_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn idle(&self, backoff: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = self.abort.cancelled() => {}
        }
    }
}

/// Busy modules whose completed count has not moved for `timeout`.
/// `progress` holds the last count seen per module and when it changed.
fn stalled_modules(
    busy: &[Arc<ModuleHandle>],
    progress: &mut HashMap<String, (u64, Instant)>,
    timeout: Duration,
) -> Vec<Arc<ModuleHandle>> {
    let now = Instant::now();
    progress.retain(|name, _| busy.iter().any(|handle| handle.name() == name.as_str()));

    busy.iter()
        .filter(|handle| {
            let completed = handle.completed();
            let seen = progress
                .entry(handle.name().to_string())
                .or_insert((completed, now));
            if seen.0 != completed {
                *seen = (completed, now);
            }
            now.duration_since(seen.1) >= timeout
        })
        .cloned()
        .collect()
}
