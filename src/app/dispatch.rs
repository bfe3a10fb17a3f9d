// SessionTail - app/dispatch.rs
//
// Fan-out of pipeline events to subscribers.
//
// Architecture:
//   - Each subscriber owns a bounded queue and a delivery thread that runs
//     its callback. `publish` only pushes onto queues, so a slow subscriber
//     never stalls file processing.
//   - A full queue applies the configured drop policy and counts the drop.
//   - `ThreadUpdated` carries only a session key and revision. A queue holds
//     at most one per session (a newer one replaces the queued one and moves
//     to the back), and delivery skips revisions older than one already
//     delivered.
//     `EntrySink`s get the thread snapshot looked up at delivery time, so
//     queued events never keep old thread copies alive.
//   - `unsubscribe` closes the queue, lets the delivery thread drain what is
//     already queued, and joins it.

use crate::app::lock;
use crate::core::conversation::{ConversationBuilder, ConversationThread};
use crate::core::model::Entry;
use crate::util::constants;
use crate::util::error::{ConfigError, ResourceError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

// =============================================================================
// Events
// =============================================================================

/// Out-of-band monitor conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorNotice {
    /// The file shrank below the read offset and is being re-read from 0.
    Discontinuity {
        path: PathBuf,
        previous_offset: u64,
        new_size: u64,
    },
    /// The file disappeared and is no longer read.
    FileInactive { path: PathBuf },
    /// An inactive file exists again.
    FileReactivated { path: PathBuf },
    /// Retries were exhausted; the file was marked inactive.
    IoFailure {
        path: PathBuf,
        operation: &'static str,
        attempts: u32,
        message: String,
    },
    /// A watched root stopped being accessible.
    RootUnavailable { path: PathBuf, message: String },
}

impl fmt::Display for MonitorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discontinuity {
                path,
                previous_offset,
                new_size,
            } => write!(
                f,
                "'{}' shrank to {new_size} bytes (offset was {previous_offset}), re-reading from start",
                path.display()
            ),
            Self::FileInactive { path } => write!(f, "'{}' removed", path.display()),
            Self::FileReactivated { path } => write!(f, "'{}' reappeared", path.display()),
            Self::IoFailure {
                path,
                operation,
                attempts,
                message,
            } => write!(
                f,
                "'{}': {operation} failed after {attempts} attempts: {message}",
                path.display()
            ),
            Self::RootUnavailable { path, message } => {
                write!(f, "watch root '{}' unavailable: {message}", path.display())
            }
        }
    }
}

/// Everything a subscriber can receive.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    EntryAppended {
        entry: Arc<Entry>,
        file_path: PathBuf,
        session_key: String,
    },
    /// The thread reached `revision`. Pull the snapshot from the monitor.
    ThreadUpdated { session_key: String, revision: u64 },
    Notice(MonitorNotice),
}

impl DispatchEvent {
    fn thread_update(&self) -> Option<(&str, u64)> {
        match self {
            DispatchEvent::ThreadUpdated {
                session_key,
                revision,
            } => Some((session_key.as_str(), *revision)),
            _ => None,
        }
    }
}

/// Callback-style consumer interface.
pub trait EntrySink: Send + 'static {
    fn on_entry(&mut self, entry: &Arc<Entry>, file_path: &Path, session_key: &str);

    fn on_thread_updated(&mut self, _thread: &Arc<ConversationThread>) {}

    fn on_notice(&mut self, _notice: &MonitorNotice) {}
}

/// Where sink subscriptions look up the current snapshot of a thread.
pub trait ThreadSource: Send + Sync + 'static {
    fn thread(&self, session_key: &str) -> Option<Arc<ConversationThread>>;
}

impl ThreadSource for Mutex<ConversationBuilder> {
    fn thread(&self, session_key: &str) -> Option<Arc<ConversationThread>> {
        lock(self).thread(session_key)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// What to discard when a subscriber queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    /// Evict the oldest queued event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
}

impl DropPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            DropPolicy::DropOldest => "drop-oldest",
            DropPolicy::DropNewest => "drop-newest",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "drop-oldest" | "oldest" => Some(DropPolicy::DropOldest),
            "drop-newest" | "newest" => Some(DropPolicy::DropNewest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Events held per subscriber before the drop policy applies.
    pub queue_capacity: usize,
    pub drop_policy: DropPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            drop_policy: DropPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(constants::MIN_QUEUE_CAPACITY..=constants::MAX_QUEUE_CAPACITY)
            .contains(&self.queue_capacity)
        {
            return Err(ConfigError::ValueOutOfRange {
                field: "dispatch.queue_capacity".to_string(),
                value: self.queue_capacity.to_string(),
                expected: format!(
                    "{}-{}",
                    constants::MIN_QUEUE_CAPACITY,
                    constants::MAX_QUEUE_CAPACITY
                ),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Bounded queue
// =============================================================================

struct QueueState {
    items: VecDeque<DispatchEvent>,
    /// Session keys with a `ThreadUpdated` currently queued.
    pending_threads: HashSet<String>,
    closed: bool,
}

impl QueueState {
    /// Replace an already queued update for `key` with one at the back of
    /// the queue carrying the higher revision, so it still follows the
    /// entries it covers.
    fn coalesce(&mut self, key: &str, revision: u64) -> bool {
        if !self.pending_threads.contains(key) {
            return false;
        }
        let Some(index) = self
            .items
            .iter()
            .position(|item| item.thread_update().is_some_and(|(k, _)| k == key))
        else {
            return false;
        };
        let queued = self.items.remove(index).and_then(|item| match item {
            DispatchEvent::ThreadUpdated { revision, .. } => Some(revision),
            _ => None,
        });
        self.items.push_back(DispatchEvent::ThreadUpdated {
            session_key: key.to_string(),
            revision: queued.map_or(revision, |q| q.max(revision)),
        });
        true
    }

    fn pop_front(&mut self) -> Option<DispatchEvent> {
        let event = self.items.pop_front()?;
        if let Some((key, _)) = event.thread_update() {
            self.pending_threads.remove(key);
        }
        Some(event)
    }

    fn push_back(&mut self, event: DispatchEvent) {
        if let Some((key, _)) = event.thread_update() {
            self.pending_threads.insert(key.to_string());
        }
        self.items.push_back(event);
    }
}

struct BoundedQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
    policy: DropPolicy,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl BoundedQueue {
    fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                pending_threads: HashSet::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            policy,
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking. Returns `false` if an event was dropped.
    fn push(&self, event: DispatchEvent) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return true;
        }
        if let Some((key, revision)) = event.thread_update() {
            if state.coalesce(key, revision) {
                return true;
            }
        }
        let mut accepted = true;
        if state.items.len() >= self.capacity {
            accepted = false;
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                DropPolicy::DropOldest => {
                    state.pop_front();
                    state.push_back(event);
                }
                DropPolicy::DropNewest => {}
            }
        } else {
            state.push_back(event);
        }
        drop(state);
        self.ready.notify_one();
        accepted
    }

    /// Block until an event is available. `None` once closed and drained.
    fn pop(&self) -> Option<DispatchEvent> {
        let mut state = lock(&self.state);
        loop {
            if let Some(event) = state.pop_front() {
                return Some(event);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }

    fn len(&self) -> usize {
        lock(&self.state).items.len()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Opaque handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Subscriber {
    queue: Arc<BoundedQueue>,
    worker: Option<JoinHandle<()>>,
}

/// Per-subscription delivery counters.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStats {
    pub id: SubscriptionId,
    pub queued: usize,
    pub delivered: u64,
    pub dropped: u64,
}

/// Delivery counters across all subscriptions, past and present.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscriptions: Vec<SubscriptionStats>,
}

pub struct Dispatcher {
    config: DispatchConfig,
    threads: Option<Arc<dyn ThreadSource>>,
    subscribers: Mutex<BTreeMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    published: AtomicU64,
    /// Counters of subscriptions that were removed.
    retired_delivered: AtomicU64,
    retired_dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self::build(config, None)
    }

    /// A dispatcher whose sink subscriptions resolve `ThreadUpdated` to
    /// snapshots from `threads`.
    pub fn with_thread_source(config: DispatchConfig, threads: Arc<dyn ThreadSource>) -> Self {
        Self::build(config, Some(threads))
    }

    fn build(config: DispatchConfig, threads: Option<Arc<dyn ThreadSource>>) -> Self {
        Self {
            config,
            threads,
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            retired_delivered: AtomicU64::new(0),
            retired_dropped: AtomicU64::new(0),
        }
    }

    /// Register a callback run on a dedicated delivery thread.
    pub fn subscribe<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(&DispatchEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(BoundedQueue::new(
            self.config.queue_capacity,
            self.config.drop_policy,
        ));

        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::spawn(move || {
            let mut delivered_revisions: HashMap<String, u64> = HashMap::new();
            while let Some(event) = worker_queue.pop() {
                if let Some((key, revision)) = event.thread_update() {
                    if delivered_revisions.get(key).is_some_and(|&last| revision <= last) {
                        continue;
                    }
                    delivered_revisions.insert(key.to_string(), revision);
                }
                callback(&event);
                worker_queue.delivered.fetch_add(1, Ordering::Relaxed);
            }
            tracing::trace!(subscription = %id, "Delivery thread exiting");
        });

        lock(&self.subscribers).insert(
            id,
            Subscriber {
                queue,
                worker: Some(worker),
            },
        );
        tracing::debug!(subscription = %id, "Subscriber added");
        id
    }

    /// Register an `EntrySink`. Thread updates reach it only when this
    /// dispatcher has a thread source, and at most once per revision.
    pub fn subscribe_sink<S: EntrySink>(&self, mut sink: S) -> SubscriptionId {
        let threads = self.threads.clone();
        let mut seen: HashMap<String, u64> = HashMap::new();
        self.subscribe(move |event| match event {
            DispatchEvent::EntryAppended {
                entry,
                file_path,
                session_key,
            } => sink.on_entry(entry, file_path, session_key),
            DispatchEvent::ThreadUpdated { session_key, .. } => {
                let Some(snapshot) = threads.as_ref().and_then(|t| t.thread(session_key)) else {
                    return;
                };
                if seen
                    .get(session_key)
                    .is_some_and(|&last| snapshot.revision() <= last)
                {
                    return;
                }
                seen.insert(session_key.clone(), snapshot.revision());
                sink.on_thread_updated(&snapshot);
            }
            DispatchEvent::Notice(notice) => sink.on_notice(notice),
        })
    }

    /// Remove a subscription after delivering what it already queued.
    /// Returns `false` for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.subscribers).remove(&id);
        match removed {
            Some(subscriber) => {
                self.retire(id, subscriber);
                true
            }
            None => false,
        }
    }

    fn retire(&self, id: SubscriptionId, mut subscriber: Subscriber) {
        subscriber.queue.close();
        if let Some(worker) = subscriber.worker.take() {
            // A callback unsubscribing itself cannot join its own thread.
            if worker.thread().id() != std::thread::current().id() && worker.join().is_err() {
                tracing::warn!(subscription = %id, "Subscriber callback panicked");
            }
        }
        self.retired_delivered.fetch_add(
            subscriber.queue.delivered.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.retired_dropped.fetch_add(
            subscriber.queue.dropped.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        tracing::debug!(subscription = %id, "Subscriber removed");
    }

    /// Offer `event` to every subscriber without blocking.
    pub fn publish(&self, event: DispatchEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let subscribers = lock(&self.subscribers);
        for (id, subscriber) in subscribers.iter() {
            if !subscriber.queue.push(event.clone()) {
                let err = ResourceError::QueueFull {
                    subscription: id.0,
                    capacity: subscriber.queue.capacity,
                    policy: self.config.drop_policy.label(),
                };
                let dropped = subscriber.queue.dropped.load(Ordering::Relaxed);
                // Warn on the first drop and every power of two after it.
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "{err}");
                } else {
                    tracing::trace!(dropped, "{err}");
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn stats(&self) -> DispatchStats {
        let subscribers = lock(&self.subscribers);
        let subscriptions: Vec<SubscriptionStats> = subscribers
            .iter()
            .map(|(id, s)| SubscriptionStats {
                id: *id,
                queued: s.queue.len(),
                delivered: s.queue.delivered.load(Ordering::Relaxed),
                dropped: s.queue.dropped.load(Ordering::Relaxed),
            })
            .collect();
        DispatchStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.retired_delivered.load(Ordering::Relaxed)
                + subscriptions.iter().map(|s| s.delivered).sum::<u64>(),
            dropped: self.retired_dropped.load(Ordering::Relaxed)
                + subscriptions.iter().map(|s| s.dropped).sum::<u64>(),
            subscriptions,
        }
    }

    /// Drain and remove every subscription.
    pub fn shutdown(&self) {
        let all = std::mem::take(&mut *lock(&self.subscribers));
        for (id, subscriber) in all {
            self.retire(id, subscriber);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn notice(n: u64) -> DispatchEvent {
        DispatchEvent::Notice(MonitorNotice::FileInactive {
            path: PathBuf::from(format!("{n}.jsonl")),
        })
    }

    fn path_of(event: &DispatchEvent) -> String {
        match event {
            DispatchEvent::Notice(MonitorNotice::FileInactive { path }) => {
                path.display().to_string()
            }
            _ => String::new(),
        }
    }

    #[test]
    fn test_events_delivered_in_order() {
        let d = Dispatcher::new(DispatchConfig::default());
        let (tx, rx) = mpsc::channel();
        let id = d.subscribe(move |e| {
            let _ = tx.send(path_of(e));
        });
        for n in 0..5 {
            d.publish(notice(n));
        }
        assert!(d.unsubscribe(id));
        let got: Vec<String> = rx.try_iter().collect();
        assert_eq!(got, (0..5).map(|n| format!("{n}.jsonl")).collect::<Vec<_>>());
        assert_eq!(d.stats().delivered, 5);
    }

    #[test]
    fn test_full_queue_drops_oldest_and_counts() {
        let d = Dispatcher::new(DispatchConfig {
            queue_capacity: 2,
            drop_policy: DropPolicy::DropOldest,
        });
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (out_tx, out_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let id = d.subscribe(move |e| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            let _ = out_tx.send(path_of(e));
        });

        d.publish(notice(0));
        // Wait until the subscriber is blocked inside event 0.
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for n in 1..=4 {
            d.publish(notice(n));
        }
        assert_eq!(d.stats().dropped, 2);

        drop(gate_tx);
        d.unsubscribe(id);
        let got: Vec<String> = out_rx.try_iter().collect();
        assert_eq!(got, vec!["0.jsonl", "3.jsonl", "4.jsonl"]);
    }

    #[test]
    fn test_drop_newest_keeps_queued_events() {
        let d = Dispatcher::new(DispatchConfig {
            queue_capacity: 1,
            drop_policy: DropPolicy::DropNewest,
        });
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (out_tx, out_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let id = d.subscribe(move |e| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            let _ = out_tx.send(path_of(e));
        });

        d.publish(notice(0));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        d.publish(notice(1));
        d.publish(notice(2));

        drop(gate_tx);
        d.unsubscribe(id);
        let got: Vec<String> = out_rx.try_iter().collect();
        assert_eq!(got, vec!["0.jsonl", "1.jsonl"]);
        assert_eq!(d.stats().dropped, 1);
    }

    #[test]
    fn test_unknown_unsubscribe_is_false() {
        let d = Dispatcher::new(DispatchConfig::default());
        let id = d.subscribe(|_| {});
        assert!(d.unsubscribe(id));
        assert!(!d.unsubscribe(id));
        assert_eq!(d.subscriber_count(), 0);
    }

    #[test]
    fn test_sink_receives_notices() {
        struct Counting(mpsc::Sender<String>);
        impl EntrySink for Counting {
            fn on_entry(&mut self, _: &Arc<Entry>, _: &Path, _: &str) {}
            fn on_notice(&mut self, notice: &MonitorNotice) {
                let _ = self.0.send(notice.to_string());
            }
        }

        let d = Dispatcher::new(DispatchConfig::default());
        let (tx, rx) = mpsc::channel();
        d.subscribe_sink(Counting(tx));
        d.publish(notice(9));
        d.shutdown();
        assert_eq!(rx.try_iter().count(), 1);
    }

    fn thread_update(key: &str, revision: u64) -> DispatchEvent {
        DispatchEvent::ThreadUpdated {
            session_key: key.to_string(),
            revision,
        }
    }

    #[test]
    fn test_thread_updates_coalesce_per_session() {
        let d = Dispatcher::new(DispatchConfig {
            queue_capacity: 4,
            drop_policy: DropPolicy::DropOldest,
        });
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (out_tx, out_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let id = d.subscribe(move |e| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            let label = match e {
                DispatchEvent::ThreadUpdated {
                    session_key,
                    revision,
                } => format!("{session_key}@{revision}"),
                other => path_of(other),
            };
            let _ = out_tx.send(label);
        });

        d.publish(notice(0));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for revision in 1..=100 {
            d.publish(thread_update("s", revision));
        }
        d.publish(thread_update("t", 1));
        d.publish(thread_update("s", 50));

        let stats = d.stats();
        assert_eq!(stats.subscriptions[0].queued, 2);
        assert_eq!(stats.dropped, 0);

        drop(gate_tx);
        d.unsubscribe(id);
        let got: Vec<String> = out_rx.try_iter().collect();
        assert_eq!(got, vec!["0.jsonl", "t@1", "s@100"]);
    }

    #[test]
    fn test_older_thread_revision_is_skipped() {
        let d = Dispatcher::new(DispatchConfig::default());
        let (tx, rx) = mpsc::channel();
        let id = d.subscribe(move |e| {
            if let DispatchEvent::ThreadUpdated { revision, .. } = e {
                let _ = tx.send(*revision);
            }
        });

        d.publish(thread_update("s", 5));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);
        d.publish(thread_update("s", 3));
        d.publish(thread_update("s", 5));
        d.publish(thread_update("other", 1));
        d.unsubscribe(id);
        let rest: Vec<u64> = rx.try_iter().collect();
        assert_eq!(rest, vec![1]);
    }

    #[test]
    fn test_sink_gets_current_snapshot_once_per_revision() {
        use serde_json::json;

        struct Threads(mpsc::Sender<(usize, u64)>);
        impl EntrySink for Threads {
            fn on_entry(&mut self, _: &Arc<Entry>, _: &Path, _: &str) {}
            fn on_thread_updated(&mut self, thread: &Arc<ConversationThread>) {
                let _ = self.0.send((thread.len(), thread.revision()));
            }
        }

        let entry = |uuid: &str| {
            let value = json!({"type": "user", "uuid": uuid, "sessionId": "s"});
            match value {
                serde_json::Value::Object(obj) => {
                    Arc::new(Entry::from_object(obj, Path::new("t.jsonl"), 1))
                }
                _ => unreachable!(),
            }
        };
        let builder = Arc::new(Mutex::new(ConversationBuilder::new()));
        lock(&builder).ingest_batch(vec![entry("a"), entry("b")]);
        let current = lock(&builder).revision("s").unwrap();

        let d = Dispatcher::with_thread_source(DispatchConfig::default(), builder.clone());
        let (tx, rx) = mpsc::channel();
        d.subscribe_sink(Threads(tx));

        // An update announced at an older revision still resolves to the
        // current snapshot; the later announcement adds nothing new.
        d.publish(thread_update("s", 1));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (2, current)
        );
        d.publish(thread_update("s", current));
        d.publish(thread_update("unknown", 1));
        d.shutdown();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_drop_policy_names() {
        assert_eq!(DropPolicy::from_name("drop_newest"), Some(DropPolicy::DropNewest));
        assert_eq!(DropPolicy::from_name("Drop-Oldest"), Some(DropPolicy::DropOldest));
        assert_eq!(DropPolicy::from_name("block"), None);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = DispatchConfig {
            queue_capacity: 0,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
