// src/core/event.rs
use std::borrow::Borrow;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use sha2::{Digest, Sha256};

use crate::error::{ReconResult, ReconError};

/// Type tag of the synthetic event that seeds every scan
pub const ROOT_EVENT_TYPE: &str = "ROOT";

/// Hash carried by ROOT events
pub const ROOT_EVENT_HASH: &str = "ROOT";

/// How many generations of lineage an event remembers
pub const LINEAGE_HOPS: usize = 2;

/// Scores attached to every event, each in `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScores {
    pub confidence: u8,
    pub visibility: u8,
    pub risk: u8,
}

impl Default for EventScores {
    fn default() -> Self {
        Self {
            confidence: 100,
            visibility: 100,
            risk: 0,
        }
    }
}

impl EventScores {
    fn validate(&self) -> ReconResult<()> {
        for (name, value) in [
            ("confidence", self.confidence),
            ("visibility", self.visibility),
            ("risk", self.risk),
        ] {
            if value > 100 {
                return Err(ReconError::InvalidInput(format!("{} score {} is outside 0..=100", name, value)));
            }
        }
        Ok(())
    }
}

/// What an event remembers about one of its ancestors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub event_type: String,
    pub data: String,
    pub hash: String,
}

impl Ancestor {
    fn of(event: &Event) -> Self {
        Self {
            event_type: event.event_type.clone(),
            data: event.data.clone(),
            hash: event.hash.clone(),
        }
    }

    /// Same type and case-insensitively equal payload as `event`
    pub fn same_fact(&self, event: &Event) -> bool {
        self.event_type == event.event_type && self.data.to_lowercase() == event.data.to_lowercase()
    }
}

/// One discovered fact.
///
/// Events are immutable once built. A child does not keep its parent alive:
/// it records the parent's hash and a copy of the last [`LINEAGE_HOPS`]
/// ancestors, enough to trace it to its parent and to spot a fact that
/// comes back around. Lineage cannot contain a cycle because a parent has
/// to exist before a child can be built from it.
#[derive(Clone)]
pub struct Event {
    event_type: String,
    data: String,
    module: String,
    generated: DateTime<Utc>,
    scores: EventScores,
    hash: String,
    parent_hash: String,
    /// Nearest first
    lineage: Vec<Ancestor>,
    depth: usize,
}

impl Event {
    /// Build the parentless sentinel that seeds a scan
    pub fn root(data: impl Into<String>) -> Self {
        Self {
            event_type: ROOT_EVENT_TYPE.to_string(),
            data: data.into(),
            module: String::new(),
            generated: Utc::now(),
            scores: EventScores::default(),
            hash: ROOT_EVENT_HASH.to_string(),
            parent_hash: ROOT_EVENT_HASH.to_string(),
            lineage: Vec::new(),
            depth: 0,
        }
    }

    /// Build an event produced by `module` while handling `parent`
    pub fn new(
        event_type: impl Into<String>,
        data: impl Into<String>,
        module: impl Into<String>,
        parent: impl Borrow<Event>,
    ) -> ReconResult<Self> {
        Self::with_scores(event_type, data, module, parent, EventScores::default())
    }

    /// Same as [`Event::new`] with explicit scores
    pub fn with_scores(
        event_type: impl Into<String>,
        data: impl Into<String>,
        module: impl Into<String>,
        parent: impl Borrow<Event>,
        scores: EventScores,
    ) -> ReconResult<Self> {
        let event_type = event_type.into();
        let data = data.into();
        let module = module.into();

        if event_type.is_empty() {
            return Err(ReconError::InvalidInput("event type must not be empty".to_string()));
        }
        if event_type == ROOT_EVENT_TYPE {
            return Err(ReconError::InvalidInput("only the scanner may create ROOT events".to_string()));
        }
        if module.is_empty() {
            return Err(ReconError::InvalidInput(format!("{} event has no producing module", event_type)));
        }
        scores.validate()?;

        let parent = parent.borrow();
        let generated = Utc::now();
        let hash = content_hash(&generated, &event_type, &data, &module);

        let mut lineage = Vec::with_capacity(LINEAGE_HOPS);
        lineage.push(Ancestor::of(parent));
        lineage.extend(parent.lineage.iter().take(LINEAGE_HOPS - 1).cloned());

        Ok(Self {
            event_type,
            data,
            module,
            generated,
            scores,
            hash,
            parent_hash: parent.hash.clone(),
            lineage,
            depth: parent.depth + 1,
        })
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn generated(&self) -> DateTime<Utc> {
        self.generated
    }

    pub fn scores(&self) -> EventScores {
        self.scores
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Hash of the parent event, `ROOT` for the root itself
    pub fn parent_hash(&self) -> &str {
        &self.parent_hash
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0 && self.event_type == ROOT_EVENT_TYPE
    }

    /// Ancestor `hops` levels up; `1` is the parent. Only the nearest
    /// [`LINEAGE_HOPS`] generations are remembered.
    pub fn ancestor(&self, hops: usize) -> Option<&Ancestor> {
        hops.checked_sub(1).and_then(|idx| self.lineage.get(idx))
    }

    /// Same type and case-insensitively equal payload
    pub fn same_fact(&self, other: &Event) -> bool {
        self.event_type == other.event_type
            && self.data.to_lowercase() == other.data.to_lowercase()
    }

    /// Number of hops back to the root
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("data", &self.data)
            .field("module", &self.module)
            .field("hash", &self.hash)
            .field("parent_hash", &self.parent_hash())
            .finish()
    }
}

fn content_hash(generated: &DateTime<Utc>, event_type: &str, data: &str, module: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(generated.to_rfc3339().as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(data.as_bytes());
    hasher.update(module.as_bytes());
    hex::encode(hasher.finalize())
}
