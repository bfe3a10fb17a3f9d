// SessionTail - app/scheduler.rs
//
// Debounce and per-path serialisation of file jobs.
//
// A single scheduler thread owns all timing state:
//   - `Touched(path)` (re)arms the debounce deadline for that path, so a
//     burst of events collapses into one job.
//   - When a deadline passes the path is handed to the worker pool, unless a
//     job for it is already running. In that case it is marked dirty and
//     runs again as soon as the current job finishes.
//   - A job that stopped at the per-pass read cap reports `more` and is
//     rescheduled immediately.
//
// On cancel, pending deadlines are dropped and the loop only waits for
// running jobs to report back before returning.

use crate::util::constants::CANCEL_CHECK_INTERVAL_MS;
use std::collections::{HashMap, HashSet};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

/// Messages into the scheduler thread.
#[derive(Debug)]
pub enum SchedulerMsg {
    /// Something about this file may have changed.
    Touched(PathBuf),
    /// A worker finished a job; `more` means bytes remain past the read cap.
    JobFinished { path: PathBuf, more: bool },
    /// A root walk failed.
    RootUnavailable { root: PathBuf, error: io::Error },
    /// A root that had failed is readable again.
    RootRecovered { root: PathBuf },
}

/// The work the scheduler drives.
pub trait JobHandler: Send + Sync + 'static {
    /// Process one path. Returns `true` if it should run again right away.
    fn process(&self, path: &Path) -> bool;

    fn root_unavailable(&self, root: &Path, error: &io::Error);

    fn root_recovered(&self, root: &Path);
}

// =============================================================================
// Debounce queue
// =============================================================================

/// Deadlines per path. Pure data; callers pass the clock in.
#[derive(Debug)]
pub struct DebounceQueue {
    delay: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl DebounceQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadlines: HashMap::new(),
        }
    }

    /// Arm or restart the timer for `path`.
    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.deadlines.insert(path, now + self.delay);
    }

    /// Make `path` due immediately.
    pub fn schedule_now(&mut self, path: PathBuf, now: Instant) {
        self.deadlines.insert(path, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every path whose deadline has passed, sorted.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &due {
            self.deadlines.remove(path);
        }
        due.sort();
        due
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

// =============================================================================
// Scheduler loop
// =============================================================================

/// Run until `cancel` is set and every in-flight job has finished.
///
/// `tx` must be a sender for `rx`; workers use it to report completion.
pub fn run_scheduler<H: JobHandler>(
    handler: Arc<H>,
    rx: mpsc::Receiver<SchedulerMsg>,
    tx: mpsc::Sender<SchedulerMsg>,
    pool: rayon::ThreadPool,
    debounce: Duration,
    cancel: Arc<AtomicBool>,
) {
    let tick = Duration::from_millis(CANCEL_CHECK_INTERVAL_MS);
    let mut queue = DebounceQueue::new(debounce);
    let mut running: HashSet<PathBuf> = HashSet::new();
    let mut dirty: HashSet<PathBuf> = HashSet::new();

    loop {
        let cancelled = cancel.load(Ordering::SeqCst);
        if cancelled {
            if !queue.is_empty() {
                tracing::debug!(pending = queue.len(), "Dropping pending debounces");
                queue.clear();
            }
            dirty.clear();
            if running.is_empty() {
                break;
            }
        }

        let now = Instant::now();
        for path in queue.take_due(now) {
            if running.contains(&path) {
                dirty.insert(path);
                continue;
            }
            running.insert(path.clone());
            let job_handler = Arc::clone(&handler);
            let done = tx.clone();
            pool.spawn(move || {
                let more = catch_unwind(AssertUnwindSafe(|| job_handler.process(&path)))
                    .unwrap_or_else(|_| {
                        tracing::error!(file = %path.display(), "File job panicked");
                        false
                    });
                let _ = done.send(SchedulerMsg::JobFinished { path, more });
            });
        }

        let wait = queue
            .next_deadline()
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(tick)
            .min(tick);

        match rx.recv_timeout(wait) {
            Ok(SchedulerMsg::Touched(path)) => {
                if !cancelled {
                    queue.touch(path, Instant::now());
                }
            }
            Ok(SchedulerMsg::JobFinished { path, more }) => {
                running.remove(&path);
                let again = dirty.remove(&path);
                if !cancelled && (more || again) {
                    queue.schedule_now(path, Instant::now());
                }
            }
            Ok(SchedulerMsg::RootUnavailable { root, error }) => {
                handler.root_unavailable(&root, &error);
            }
            Ok(SchedulerMsg::RootRecovered { root }) => handler.root_recovered(&root),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!("Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_touch_restarts_timer() {
        let start = Instant::now();
        let mut q = DebounceQueue::new(Duration::from_millis(200));
        q.touch(PathBuf::from("a"), start);
        q.touch(PathBuf::from("a"), start + Duration::from_millis(150));

        assert!(q.take_due(start + Duration::from_millis(250)).is_empty());
        assert_eq!(
            q.take_due(start + Duration::from_millis(350)),
            vec![PathBuf::from("a")]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn test_paths_are_independent() {
        let start = Instant::now();
        let mut q = DebounceQueue::new(Duration::from_millis(100));
        q.touch(PathBuf::from("a"), start);
        q.touch(PathBuf::from("b"), start + Duration::from_millis(80));
        assert_eq!(q.next_deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(
            q.take_due(start + Duration::from_millis(120)),
            vec![PathBuf::from("a")]
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_schedule_now_is_due_immediately() {
        let now = Instant::now();
        let mut q = DebounceQueue::new(Duration::from_secs(5));
        q.schedule_now(PathBuf::from("a"), now);
        assert_eq!(q.take_due(now).len(), 1);
    }

    struct Recorder {
        calls: Mutex<Vec<PathBuf>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        hold: Duration,
        remaining: AtomicUsize,
    }

    impl Recorder {
        fn new(hold: Duration, extra_passes: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                hold,
                remaining: AtomicUsize::new(extra_passes),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl JobHandler for Recorder {
        fn process(&self, path: &Path) -> bool {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.hold);
            self.calls.lock().unwrap().push(path.to_path_buf());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn root_unavailable(&self, _: &Path, _: &io::Error) {}

        fn root_recovered(&self, _: &Path) {}
    }

    fn spawn(
        handler: Arc<Recorder>,
        debounce: Duration,
    ) -> (
        mpsc::Sender<SchedulerMsg>,
        Arc<AtomicBool>,
        std::thread::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap();
        let worker_tx = tx.clone();
        let flag = Arc::clone(&cancel);
        let join = std::thread::spawn(move || {
            run_scheduler(handler, rx, worker_tx, pool, debounce, flag)
        });
        (tx, cancel, join)
    }

    fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn test_burst_collapses_into_one_job() {
        let handler = Arc::new(Recorder::new(Duration::ZERO, 0));
        let (tx, cancel, join) = spawn(Arc::clone(&handler), Duration::from_millis(150));

        for _ in 0..5 {
            tx.send(SchedulerMsg::Touched(PathBuf::from("a"))).unwrap();
        }
        assert!(wait_for(Duration::from_secs(5), || handler.calls() == 1));
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(handler.calls(), 1);

        cancel.store(true, Ordering::SeqCst);
        join.join().unwrap();
    }

    #[test]
    fn test_same_path_never_runs_concurrently() {
        let handler = Arc::new(Recorder::new(Duration::from_millis(200), 0));
        let (tx, cancel, join) = spawn(Arc::clone(&handler), Duration::from_millis(50));

        tx.send(SchedulerMsg::Touched(PathBuf::from("a"))).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        // Fires while the first job is still running.
        tx.send(SchedulerMsg::Touched(PathBuf::from("a"))).unwrap();

        assert!(wait_for(Duration::from_secs(5), || handler.calls() == 2));
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);

        cancel.store(true, Ordering::SeqCst);
        join.join().unwrap();
    }

    #[test]
    fn test_more_reschedules_immediately() {
        let handler = Arc::new(Recorder::new(Duration::ZERO, 2));
        let (tx, cancel, join) = spawn(Arc::clone(&handler), Duration::from_millis(50));
        tx.send(SchedulerMsg::Touched(PathBuf::from("a"))).unwrap();
        assert!(wait_for(Duration::from_secs(5), || handler.calls() == 3));
        cancel.store(true, Ordering::SeqCst);
        join.join().unwrap();
    }

    #[test]
    fn test_cancel_waits_for_running_job() {
        let handler = Arc::new(Recorder::new(Duration::from_millis(300), 0));
        let (tx, cancel, join) = spawn(Arc::clone(&handler), Duration::from_millis(50));
        tx.send(SchedulerMsg::Touched(PathBuf::from("a"))).unwrap();
        assert!(wait_for(Duration::from_secs(5), || {
            handler.in_flight.load(Ordering::SeqCst) == 1
        }));
        cancel.store(true, Ordering::SeqCst);
        join.join().unwrap();
        assert_eq!(handler.calls(), 1);
    }
}
