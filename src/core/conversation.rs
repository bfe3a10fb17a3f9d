// SessionTail - core/conversation.rs
//
// Groups entries into per-session threads and links them parent -> child.
//
// Parent references are never copied onto entries. Each thread keeps a uuid
// index and a parent-uuid -> children index; every relationship query is
// answered from those at read time, so a parent that arrives after its
// children resolves as soon as it is ingested.
//
// Threads are held as `Arc<ConversationThread>` and mutated through
// `Arc::make_mut`: snapshots handed out earlier stay frozen, and a thread
// nobody holds a snapshot of is updated in place.

use crate::core::model::{Entry, EntryType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

// =============================================================================
// Thread
// =============================================================================

/// Derived counters for one thread. Recomputed once per ingest batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStats {
    pub entry_count: usize,
    pub counts_by_type: BTreeMap<EntryType, usize>,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Distinct parent uuids referenced but not (yet) present.
    pub unresolved_parents: usize,
}

/// Ordered entries of one session plus the indices that link them.
#[derive(Debug, Clone)]
pub struct ConversationThread {
    session_key: String,
    session_id: Option<String>,
    entries: Vec<Arc<Entry>>,
    by_uuid: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    stats: ThreadStats,
    revision: u64,
}

impl ConversationThread {
    fn new(session_key: &str, session_id: Option<String>) -> Self {
        Self {
            session_key: session_key.to_string(),
            session_id,
            entries: Vec::new(),
            by_uuid: HashMap::new(),
            children: HashMap::new(),
            stats: ThreadStats::default(),
            revision: 0,
        }
    }

    /// Session id, or the no-session sentinel.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// The real session id; `None` for the sentinel thread.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Entries in ingest order.
    pub fn entries(&self) -> &[Arc<Entry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    /// Bumped on every append; lets consumers cheaply detect change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.by_uuid.contains_key(uuid)
    }

    pub fn get(&self, uuid: &str) -> Option<&Arc<Entry>> {
        self.by_uuid.get(uuid).map(|&i| &self.entries[i])
    }

    /// The entry `uuid` points at through `parent_uuid`, if it has arrived.
    pub fn parent_of(&self, uuid: &str) -> Option<&Arc<Entry>> {
        let parent = self.get(uuid)?.parent_uuid.as_deref()?;
        self.get(parent)
    }

    /// Entries naming `uuid` as their parent, in ingest order. Works even
    /// when `uuid` itself has not arrived.
    pub fn children_of(&self, uuid: &str) -> Vec<&Arc<Entry>> {
        self.children
            .get(uuid)
            .map(|idx| idx.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Entries with no parent reference or whose parent is not present.
    pub fn roots(&self) -> Vec<&Arc<Entry>> {
        self.entries
            .iter()
            .filter(|e| match e.parent_uuid.as_deref() {
                None => true,
                Some(p) => !self.by_uuid.contains_key(p),
            })
            .collect()
    }

    /// `uuid` followed by its resolvable ancestors, nearest first. Stops at
    /// a missing parent or on revisiting an entry (cyclic references).
    pub fn ancestry(&self, uuid: &str) -> Vec<&Arc<Entry>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.get(uuid);
        while let Some(entry) = current {
            let key = entry.uuid.as_deref().unwrap_or_default();
            if !seen.insert(key) {
                break;
            }
            chain.push(entry);
            current = entry.parent_uuid.as_deref().and_then(|p| self.get(p));
        }
        chain
    }

    /// Parent uuids referenced in this thread that have no entry, sorted.
    pub fn unresolved_parents(&self) -> Vec<&str> {
        self.children
            .keys()
            .filter(|p| !self.by_uuid.contains_key(p.as_str()))
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Append unless the uuid is already present. Entries without a uuid
    /// cannot be identified and are always appended.
    fn append(&mut self, entry: Arc<Entry>) -> bool {
        if let Some(uuid) = entry.uuid.as_deref() {
            if self.by_uuid.contains_key(uuid) {
                return false;
            }
        }
        let index = self.entries.len();
        if let Some(uuid) = entry.uuid.clone() {
            self.by_uuid.insert(uuid, index);
        }
        if let Some(parent) = entry.parent_uuid.clone() {
            self.children.entry(parent).or_default().push(index);
        }
        self.entries.push(entry);
        self.revision += 1;
        true
    }

    fn recompute_stats(&mut self) {
        let mut stats = ThreadStats {
            entry_count: self.entries.len(),
            ..ThreadStats::default()
        };
        for entry in &self.entries {
            *stats.counts_by_type.entry(entry.entry_type).or_insert(0) += 1;
            if let Some(ts) = entry.timestamp {
                stats.first_timestamp = Some(stats.first_timestamp.map_or(ts, |f| f.min(ts)));
                stats.last_timestamp = Some(stats.last_timestamp.map_or(ts, |l| l.max(ts)));
            }
        }
        stats.unresolved_parents = self
            .children
            .keys()
            .filter(|p| !self.by_uuid.contains_key(p.as_str()))
            .count();
        self.stats = stats;
    }
}

// =============================================================================
// Builder
// =============================================================================

/// What one batch changed.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Entries actually appended, in input order.
    pub appended: Vec<Arc<Entry>>,
    /// Entries dropped because their uuid was already in the thread.
    pub duplicates: usize,
    /// Session keys of threads that received at least one entry, sorted.
    pub touched: Vec<String>,
}

/// Registry of all threads, keyed by session key.
#[derive(Debug, Default)]
pub struct ConversationBuilder {
    threads: HashMap<String, Arc<ConversationThread>>,
}

impl ConversationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one entry. Returns `false` for a duplicate.
    pub fn ingest(&mut self, entry: Arc<Entry>) -> bool {
        !self.ingest_batch([entry]).appended.is_empty()
    }

    /// Ingest entries in order, then recompute stats for touched threads only.
    pub fn ingest_batch<I>(&mut self, entries: I) -> BatchOutcome
    where
        I: IntoIterator<Item = Arc<Entry>>,
    {
        let mut outcome = BatchOutcome::default();
        let mut touched = BTreeSet::new();

        for entry in entries {
            let key = entry.session_key().to_string();
            let thread = self.threads.entry(key.clone()).or_insert_with(|| {
                tracing::debug!(session = %key, "New conversation thread");
                Arc::new(ConversationThread::new(&key, entry.session_id.clone()))
            });
            if Arc::make_mut(thread).append(Arc::clone(&entry)) {
                outcome.appended.push(entry);
                touched.insert(key);
            } else {
                outcome.duplicates += 1;
            }
        }

        for key in &touched {
            if let Some(thread) = self.threads.get_mut(key) {
                Arc::make_mut(thread).recompute_stats();
            }
        }

        if outcome.duplicates > 0 {
            tracing::trace!(duplicates = outcome.duplicates, "Duplicate entries ignored");
        }
        outcome.touched = touched.into_iter().collect();
        outcome
    }

    /// Snapshot of one thread.
    pub fn thread(&self, session_key: &str) -> Option<Arc<ConversationThread>> {
        self.threads.get(session_key).cloned()
    }

    /// Snapshots of all threads, sorted by session key.
    pub fn threads(&self) -> Vec<Arc<ConversationThread>> {
        let mut all: Vec<_> = self.threads.values().cloned().collect();
        all.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        all
    }

    /// Current revision of one thread, without taking a snapshot.
    pub fn revision(&self, session_key: &str) -> Option<u64> {
        self.threads.get(session_key).map(|t| t.revision)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn entry_count(&self) -> usize {
        self.threads.values().map(|t| t.len()).sum()
    }
}
