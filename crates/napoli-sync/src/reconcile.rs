use chrono::{DateTime, Utc};
use napoli_core::push::PushEvent;
use napoli_core::{
    Conversation, KnowledgeItem, Lead, LogLevel, LogLine, McpServer, MenuItem, WppSession,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

pub trait Entity: Clone + Serialize + DeserializeOwned + Send + 'static {
    fn id(&self) -> &str;
}

macro_rules! entity_by_id {
    ($($ty:ty),* $(,)?) => {
        $(impl Entity for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

entity_by_id!(WppSession, McpServer, Lead, Conversation, MenuItem, KnowledgeItem);

/// Bounded activity log: newest appended, oldest evicted past the cap.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRing {
    cap: usize,
    next_seq: u64,
    lines: VecDeque<LogLine>,
}

impl LogRing {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            next_seq: 1,
            lines: VecDeque::new(),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) -> &LogLine {
        self.push_line(level, message.into(), None)
    }

    pub fn push_from(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> &LogLine {
        self.push_line(level, message.into(), Some(source.into()))
    }

    fn push_line(&mut self, level: LogLevel, message: String, source: Option<String>) -> &LogLine {
        while self.lines.len() >= self.cap {
            self.lines.pop_front();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.lines.push_back(LogLine {
            seq,
            at: Utc::now(),
            level,
            message,
            source,
        });
        &self.lines[self.lines.len() - 1]
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn latest(&self) -> Option<&LogLine> {
        self.lines.back()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// One reconciled entity plus its local bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    pub id: String,
    pub value: T,
    pub last_sync: DateTime<Utc>,
    pub revision: Option<u64>,
    pub logs: LogRing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Every matching event is applied, in arrival order.
    #[default]
    LastWriterWins,
    /// Events carrying a revision not newer than the last accepted one are dropped.
    RejectStale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    Unchanged,
    Inserted,
    AlreadyPresent,
    UnknownEntity,
    Stale { incoming: u64, current: u64 },
    Rejected(String),
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Applied | MergeOutcome::Inserted)
    }
}

/// Id-keyed, insertion-ordered entity collection. Index 0 is the head of the
/// newest-first list panels render.
#[derive(Debug, Clone)]
pub struct EntityStore<T> {
    order: Vec<String>,
    records: HashMap<String, Tracked<T>>,
    policy: MergePolicy,
    log_cap: usize,
}

impl<T: Entity> EntityStore<T> {
    pub fn new(log_cap: usize) -> Self {
        Self {
            order: Vec::new(),
            records: HashMap::new(),
            policy: MergePolicy::default(),
            log_cap,
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Tracked<T>> {
        self.records.get(id)
    }

    pub fn value(&self, id: &str) -> Option<&T> {
        self.records.get(id).map(|record| &record.value)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tracked<T>> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn values(&self) -> Vec<T> {
        self.iter().map(|record| record.value.clone()).collect()
    }

    fn track(&self, value: T) -> Tracked<T> {
        Tracked {
            id: value.id().to_string(),
            value,
            last_sync: Utc::now(),
            revision: None,
            logs: LogRing::new(self.log_cap),
        }
    }

    /// Optimistic local insert, appended at the tail.
    pub fn insert_local(&mut self, value: T) -> MergeOutcome {
        if self.contains(value.id()) {
            return MergeOutcome::AlreadyPresent;
        }
        let record = self.track(value);
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        MergeOutcome::Inserted
    }

    /// Announcement from the backend: insert at the head if absent, never
    /// touch an existing entity.
    pub fn announce(&mut self, value: T) -> MergeOutcome {
        if self.contains(value.id()) {
            return MergeOutcome::AlreadyPresent;
        }
        let record = self.track(value);
        self.order.insert(0, record.id.clone());
        self.records.insert(record.id.clone(), record);
        MergeOutcome::Inserted
    }

    /// Replaces the whole value and moves it to the head. Logs survive.
    pub fn upsert_front(&mut self, value: T) -> MergeOutcome {
        let id = value.id().to_string();
        self.order.retain(|existing| existing != &id);
        self.order.insert(0, id.clone());
        match self.records.get_mut(&id) {
            Some(record) => {
                record.value = value;
                record.last_sync = Utc::now();
                MergeOutcome::Applied
            }
            None => {
                let record = self.track(value);
                self.records.insert(id, record);
                MergeOutcome::Inserted
            }
        }
    }

    /// Shallow merge of `patch` into the entity with `id`. Only top-level keys
    /// present in the patch are replaced; unknown keys are ignored.
    pub fn merge(&mut self, id: &str, patch: &Value, revision: Option<u64>) -> MergeOutcome {
        let policy = self.policy;
        let Some(record) = self.records.get_mut(id) else {
            debug!(event = "reconcile_unknown_entity", id);
            return MergeOutcome::UnknownEntity;
        };
        if let (MergePolicy::RejectStale, Some(incoming), Some(current)) =
            (policy, revision, record.revision)
        {
            if incoming <= current {
                debug!(event = "reconcile_stale", id, incoming, current);
                return MergeOutcome::Stale { incoming, current };
            }
        }
        let Some(fields) = patch.as_object() else {
            return MergeOutcome::Rejected("patch is not an object".to_string());
        };
        let outcome = match shallow_merge(&record.value, fields) {
            Ok(Some(merged)) => {
                record.value = merged;
                MergeOutcome::Applied
            }
            Ok(None) => MergeOutcome::Unchanged,
            Err(reason) => {
                warn!(event = "reconcile_patch_rejected", id, reason = %reason);
                return MergeOutcome::Rejected(reason);
            }
        };
        record.last_sync = Utc::now();
        if revision.is_some() {
            record.revision = revision;
        }
        outcome
    }

    /// Applies a push event to the entity named by its correlation key.
    pub fn apply_event(&mut self, event: &PushEvent) -> MergeOutcome {
        match event.entity_id.as_deref() {
            Some(id) => self.merge(id, &event.payload, event.revision),
            None => MergeOutcome::UnknownEntity,
        }
    }

    pub fn update_local<F>(&mut self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.records.get_mut(id) {
            Some(record) => {
                update(&mut record.value);
                record.last_sync = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn append_log(&mut self, id: &str, level: LogLevel, message: impl Into<String>) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.logs.push(level, message);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Tracked<T>> {
        let removed = self.records.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Reloads the collection from a list fetch. Entities that survive keep
    /// their logs and revision.
    pub fn replace_all(&mut self, values: Vec<T>) {
        let mut previous = std::mem::take(&mut self.records);
        self.order.clear();
        for value in values {
            let id = value.id().to_string();
            if self.records.contains_key(&id) {
                continue;
            }
            let record = match previous.remove(&id) {
                Some(mut record) => {
                    record.value = value;
                    record.last_sync = Utc::now();
                    record
                }
                None => self.track(value),
            };
            self.order.push(id.clone());
            self.records.insert(id, record);
        }
    }

    /// Keeps the first `len` entities in list order.
    pub fn truncate(&mut self, len: usize) {
        if self.order.len() <= len {
            return;
        }
        for id in self.order.split_off(len) {
            self.records.remove(&id);
        }
    }
}

/// Returns `Ok(None)` when the patch leaves the value as it was.
fn shallow_merge<T: Entity>(current: &T, patch: &Map<String, Value>) -> Result<Option<T>, String> {
    let mut value = serde_json::to_value(current).map_err(|err| err.to_string())?;
    let Some(fields) = value.as_object_mut() else {
        return Err("entity is not a JSON object".to_string());
    };
    let mut touched = false;
    for (key, incoming) in patch {
        if key == "id" {
            continue;
        }
        let Some(field) = resolve_field(fields, key) else {
            continue;
        };
        if fields.get(&field) != Some(incoming) {
            fields.insert(field, incoming.clone());
            touched = true;
        }
    }
    if !touched {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| err.to_string())
}

// Backend payloads are snake_case while entities serialize camelCase.
fn resolve_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    if fields.contains_key(key) {
        return Some(key.to_string());
    }
    let camel = snake_to_camel(key);
    fields.contains_key(&camel).then_some(camel)
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}
