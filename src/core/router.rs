// src/core/router.rs
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::event::{Event, LINEAGE_HOPS};
use crate::core::module::{Delivery, ModuleHandle};

/// What happened to one routed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteOutcome {
    pub delivered: usize,
    pub store_only: bool,
    pub rejected: bool,
}

/// Fans produced events out to interested modules
pub struct Router {
    listeners: Vec<Arc<ModuleHandle>>,
    stop: CancellationToken,
}

impl Router {
    /// Listeners are visited in ascending priority; ties keep insertion order
    pub fn new(mut listeners: Vec<Arc<ModuleHandle>>, stop: CancellationToken) -> Self {
        listeners.sort_by_key(|l| l.priority());
        Self { listeners, stop }
    }

    pub fn listeners(&self) -> &[Arc<ModuleHandle>] {
        &self.listeners
    }

    /// Deliver a clone of `event` to every active listener that watches its
    /// type. Events restating their grandparent's fact reach only the
    /// persistence listener.
    pub fn route(&self, event: &Arc<Event>) -> RouteOutcome {
        if event.data().is_empty() || self.stop.is_cancelled() {
            return RouteOutcome { rejected: true, ..Default::default() };
        }

        let store_only = repeats_lineage(event);
        if store_only {
            debug!(
                "{} event '{}' from {} repeats its lineage, storing only",
                event.event_type(), event.data(), event.module()
            );
        }

        let mut delivered = 0;
        for listener in &self.listeners {
            if !listener.is_active() || !listener.accepts(event.event_type()) {
                continue;
            }
            if store_only && !listener.is_persistence() {
                continue;
            }
            let copy = Arc::new(Event::clone(event));
            if listener.deliver(Delivery::Event(copy)) {
                delivered += 1;
            }
        }

        RouteOutcome { delivered, store_only, rejected: false }
    }

    /// Queue a finalisation request on every active listener
    pub fn broadcast_finished(&self) -> usize {
        self.listeners
            .iter()
            .filter(|l| l.is_active())
            .filter(|l| l.deliver(Delivery::Finished))
            .count()
    }
}

/// True when the ancestor exactly [`LINEAGE_HOPS`] up carries the same
/// type and (case-insensitive) payload. Nearer or further repeats are not
/// caught.
pub fn repeats_lineage(event: &Event) -> bool {
    event
        .ancestor(LINEAGE_HOPS)
        .map(|ancestor| ancestor.same_fact(event))
        .unwrap_or(false)
}
