// src/core/testing.rs
//! Scripted modules and helpers shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::core::event::Event;
use crate::core::module::{Interest, Module, ModuleContext, ModuleMetadata};
use crate::core::target::{Target, TargetAlias};
use crate::error::{ReconResult, ReconError};
use crate::store::MemoryStore;
use crate::utils::http::HttpClient;

pub fn test_context(
    name: &str,
    output_filter: Option<HashSet<String>>,
) -> (ModuleContext, UnboundedReceiver<Arc<Event>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (build_context(name, HashMap::new(), tx, output_filter), rx)
}

/// A context carrying `options`, bound to `target`
pub fn configured_context(
    name: &str,
    options: HashMap<String, Value>,
    target: Target,
) -> (ModuleContext, UnboundedReceiver<Arc<Event>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = build_context(name, options, tx, None);
    ctx.bind_target(Arc::new(target));
    (ctx, rx)
}

/// A context whose notifications land on an existing queue
pub fn wired_context(name: &str, outgoing: UnboundedSender<Arc<Event>>) -> ModuleContext {
    build_context(name, HashMap::new(), outgoing, None)
}

fn build_context(
    name: &str,
    options: HashMap<String, Value>,
    outgoing: UnboundedSender<Arc<Event>>,
    output_filter: Option<HashSet<String>>,
) -> ModuleContext {
    ModuleContext::new(
        name,
        "test-scan",
        options,
        outgoing,
        output_filter,
        CancellationToken::new(),
        Arc::new(MemoryStore::new()),
        HttpClient::new(None, Some(1), None).unwrap(),
    )
}

#[derive(Clone)]
struct Emission {
    on: String,
    event_type: String,
    data: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    None,
    Panic,
    Hang,
}

/// How long each `handle_event` call takes before doing its work
#[derive(Clone, Copy, PartialEq)]
enum Pace {
    Immediate,
    Sleep(Duration),
    Block(Duration),
}

#[derive(Clone)]
struct Stream {
    event_type: String,
    count: usize,
    interval: Duration,
}

/// A module whose behaviour is described up front
pub struct ScriptedModule {
    metadata: ModuleMetadata,
    interest: Interest,
    emissions: Vec<Emission>,
    /// (pass, event type, payload)
    finish_emissions: Vec<(usize, String, String)>,
    stream: Option<Stream>,
    fail_on: Option<String>,
    fault: Fault,
    pace: Pace,
    setup_error_state: bool,
    setup_fails: bool,
    persistence: bool,
    aliases: Vec<TargetAlias>,
    received: Arc<Mutex<Vec<Arc<Event>>>>,
    finish_calls: Arc<AtomicUsize>,
}

impl ScriptedModule {
    pub fn new(name: &str, watched: &[&str]) -> Self {
        let interest = if watched.len() == 1 && watched[0] == "*" {
            Interest::Any
        } else {
            Interest::types(watched.iter().copied())
        };
        Self {
            metadata: ModuleMetadata::new(name, "scripted test module"),
            interest,
            emissions: Vec::new(),
            finish_emissions: Vec::new(),
            stream: None,
            fail_on: None,
            fault: Fault::None,
            pace: Pace::Immediate,
            setup_error_state: false,
            setup_fails: false,
            persistence: false,
            aliases: Vec::new(),
            received: Arc::new(Mutex::new(Vec::new())),
            finish_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// On an `on` event, emit `event_type`; `{data}` in `data` is replaced
    /// by the incoming payload.
    pub fn emits(mut self, on: &str, event_type: &str, data: &str) -> Self {
        self.emissions.push(Emission {
            on: on.to_string(),
            event_type: event_type.to_string(),
            data: data.to_string(),
        });
        self
    }

    /// Emit from the first `finish` call, parented on the last event seen
    pub fn emits_on_finish(self, event_type: &str, data: &str) -> Self {
        self.emits_on_pass(1, event_type, data)
    }

    /// Emit from the `pass`-th `finish` call (counting from 1)
    pub fn emits_on_pass(mut self, pass: usize, event_type: &str, data: &str) -> Self {
        self.finish_emissions.push((pass, event_type.to_string(), data.to_string()));
        self
    }

    /// On every handled event, emit `count` events of `event_type` spaced
    /// `interval` apart, ignoring the stop flag
    pub fn streams(mut self, event_type: &str, count: usize, interval: Duration) -> Self {
        self.stream = Some(Stream {
            event_type: event_type.to_string(),
            count,
            interval,
        });
        self
    }

    /// Await `delay` at the start of every `handle_event` call
    pub fn slow(mut self, delay: Duration) -> Self {
        self.pace = Pace::Sleep(delay);
        self
    }

    /// Block the calling thread for `delay` in every `handle_event` call
    pub fn blocking(mut self, delay: Duration) -> Self {
        self.pace = Pace::Block(delay);
        self
    }

    pub fn failing_on(mut self, data: &str) -> Self {
        self.fail_on = Some(data.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.fault = Fault::Panic;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.fault = Fault::Hang;
        self
    }

    pub fn error_state_in_setup(mut self) -> Self {
        self.setup_error_state = true;
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.setup_fails = true;
        self
    }

    pub fn as_persistence(mut self) -> Self {
        self.persistence = true;
        self
    }

    pub fn with_alias(mut self, alias: TargetAlias) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn received(&self) -> Arc<Mutex<Vec<Arc<Event>>>> {
        self.received.clone()
    }

    pub fn finish_calls(&self) -> Arc<AtomicUsize> {
        self.finish_calls.clone()
    }
}

#[async_trait]
impl Module for ScriptedModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    async fn setup(&mut self, ctx: &ModuleContext) -> ReconResult<()> {
        if self.setup_fails {
            return Err(ReconError::ModuleInitError {
                module: self.metadata.name.clone(),
                message: "missing API key".to_string(),
            });
        }
        if self.setup_error_state {
            ctx.set_error_state();
        }
        Ok(())
    }

    fn watched_events(&self) -> Interest {
        self.interest.clone()
    }

    fn produced_events(&self) -> Vec<String> {
        self.emissions.iter().map(|e| e.event_type.clone()).collect()
    }

    async fn enrich_target(&self, _ctx: &ModuleContext, _target: &Target) -> Vec<TargetAlias> {
        self.aliases.clone()
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> ReconResult<()> {
        self.received.lock().push(event.clone());

        match self.fault {
            Fault::Panic => panic!("{} exploded", self.metadata.name),
            Fault::Hang => std::future::pending::<()>().await,
            Fault::None => {}
        }
        match self.pace {
            Pace::Immediate => {}
            Pace::Sleep(delay) => tokio::time::sleep(delay).await,
            Pace::Block(delay) => std::thread::sleep(delay),
        }
        if self.fail_on.as_deref() == Some(event.data()) {
            return Err(ReconError::module(&self.metadata.name, format!("cannot handle {}", event.data())));
        }

        for emission in self.emissions.iter().filter(|e| e.on == event.event_type()) {
            let data = emission.data.replace("{data}", event.data());
            ctx.notify(Event::new(&emission.event_type, data, &self.metadata.name, event.clone())?);
        }
        if let Some(stream) = &self.stream {
            for i in 0..stream.count {
                let data = format!("10.{}.0.{}", event.depth(), i);
                ctx.notify(Event::new(&stream.event_type, data, &self.metadata.name, event.clone())?);
                tokio::time::sleep(stream.interval).await;
            }
        }
        Ok(())
    }

    async fn finish(&self, ctx: &ModuleContext) -> ReconResult<()> {
        let pass = self.finish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let parent = self.received.lock().last().cloned();
        if let Some(parent) = parent {
            for (_, event_type, data) in self.finish_emissions.iter().filter(|(p, _, _)| *p == pass) {
                ctx.notify(Event::new(event_type, data.clone(), &self.metadata.name, parent.clone())?);
            }
        }
        Ok(())
    }

    fn is_persistence(&self) -> bool {
        self.persistence
    }
}
