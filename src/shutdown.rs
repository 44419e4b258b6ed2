//! Graceful shutdown coordination.
//!
//! Background work registers itself under a name and observes a
//! [`CancelToken`]. On exit the application trips the process-wide signal
//! and waits, bounded, for every registered entry to drop out of the
//! registry. Nothing is ever killed: tasks stop by checking their token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::ScannerError;

static GLOBAL: Lazy<Arc<ShutdownCoordinator>> = Lazy::new(|| Arc::new(ShutdownCoordinator::new()));

/// One-way boolean flag shared between threads.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call flipped the flag.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process shutdown OR local stop; either alone cancels.
#[derive(Debug, Clone)]
pub struct CancelToken {
    shutdown: CancelFlag,
    local: CancelFlag,
}

impl CancelToken {
    pub fn new(shutdown: CancelFlag, local: CancelFlag) -> Self {
        Self { shutdown, local }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_set() || self.local.is_set()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Request a local stop of the task holding this token.
    pub fn request_stop(&self) {
        self.local.trip();
    }
}

#[derive(Debug, Default)]
struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    fn is_finished(&self) -> bool {
        *self.done.lock()
    }

    /// Block until finished or `deadline`; returns whether it finished.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}

#[derive(Debug)]
struct TaskEntry {
    id: u64,
    stop: CancelFlag,
    completion: Arc<Completion>,
}

/// Outcome of [`ShutdownCoordinator::wait_for_shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Nothing was registered.
    NothingToWait,
    /// Every registered task finished in time.
    Completed,
    /// The timeout elapsed first; these names were still running.
    TimedOut { outstanding: Vec<String> },
}

/// Registry of named in-flight background operations plus the process-wide
/// cancellation signal.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    signal: CancelFlag,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_id: AtomicU64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide coordinator.
    pub fn global() -> Arc<ShutdownCoordinator> {
        GLOBAL.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.signal.is_set()
    }

    /// Token observing only the process-wide signal.
    pub fn token(&self) -> CancelToken {
        CancelToken::new(self.signal.clone(), CancelFlag::new())
    }

    /// Trip the shutdown signal and ask every registered task to stop.
    /// A second call is a no-op.
    pub fn signal_shutdown(&self) {
        if !self.signal.trip() {
            debug!("Shutdown already requested.");
            return;
        }
        info!("Shutdown requested.");

        let tasks = self.tasks.lock();
        for entry in tasks.values() {
            entry.stop.trip();
        }
    }

    /// Register an operation started elsewhere. The entry is removed when the
    /// returned guard drops, whichever way the operation ends.
    ///
    /// A previous entry with the same name is replaced.
    pub fn register(self: &Arc<Self>, name: &str) -> TaskGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancelFlag::new();
        let completion = Arc::new(Completion::default());

        // A task registered after shutdown still has to observe it.
        if self.signal.is_set() {
            stop.trip();
        }

        {
            let mut tasks = self.tasks.lock();
            let stale = tasks.insert(
                name.to_string(),
                TaskEntry {
                    id,
                    stop: stop.clone(),
                    completion: completion.clone(),
                },
            );
            if let Some(stale) = stale {
                debug!("Replacing stale task entry '{}' (id {}).", name, stale.id);
            }
            debug!("Registered task '{}' (id {}). Tasks: {}", name, id, tasks.len());
        }

        TaskGuard {
            coordinator: Arc::clone(self),
            name: name.to_string(),
            id,
            token: CancelToken::new(self.signal.clone(), stop),
            completion,
        }
    }

    /// Register `name` and run `f` on a dedicated thread of the same name.
    pub fn spawn<F, T>(self: &Arc<Self>, name: &str, f: F) -> Result<TaskHandle<T>, ScannerError>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.register(name);
        let token = guard.token();
        let completion = guard.completion.clone();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let guard = guard;
                f(guard.token())
            })
            .map_err(|source| ScannerError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(TaskHandle {
            name: name.to_string(),
            token,
            completion,
            join,
        })
    }

    /// Names currently registered.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Wait until every task registered right now has finished, or until
    /// `timeout` elapses. Never fails; a timeout is reported, not raised.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> ShutdownReport {
        debug!("Waiting for registered tasks to complete...");
        let pending: Vec<(String, Arc<Completion>)> = {
            let tasks = self.tasks.lock();
            tasks
                .iter()
                .map(|(name, entry)| (name.clone(), entry.completion.clone()))
                .collect()
        };

        if pending.is_empty() {
            info!("No tasks registered to wait for.");
            return ShutdownReport::NothingToWait;
        }

        let deadline = Instant::now() + timeout;
        for (_, completion) in &pending {
            if !completion.wait_until(deadline) {
                break;
            }
        }

        let mut outstanding: Vec<String> = pending
            .into_iter()
            .filter(|(_, completion)| !completion.is_finished())
            .map(|(name, _)| name)
            .collect();

        if outstanding.is_empty() {
            info!("All tasks completed.");
            return ShutdownReport::Completed;
        }

        outstanding.sort();
        warn!("Timeout waiting for tasks to complete after {:?}.", timeout);
        for name in &outstanding {
            info!("Task '{}' is still running.", name);
        }
        ShutdownReport::TimedOut { outstanding }
    }

    fn deregister(&self, name: &str, id: u64) {
        let mut tasks = self.tasks.lock();
        // Only the entry this guard created; a newer task may own the name now.
        if tasks.get(name).map(|entry| entry.id) == Some(id) {
            tasks.remove(name);
        }
        debug!("Task '{}' (id {}) completed. Remaining tasks: {}", name, id, tasks.len());
    }
}

/// Registration of one background operation; deregisters on drop.
#[derive(Debug)]
pub struct TaskGuard {
    coordinator: Arc<ShutdownCoordinator>,
    name: String,
    id: u64,
    token: CancelToken,
    completion: Arc<Completion>,
}

impl TaskGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.coordinator.deregister(&self.name, self.id);
        self.completion.finish();
    }
}

/// A registered worker thread.
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: String,
    token: CancelToken,
    completion: Arc<Completion>,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask this task alone to stop.
    pub fn request_stop(&self) {
        self.token.request_stop();
    }

    /// True once the task body has returned (or unwound).
    pub fn is_finished(&self) -> bool {
        self.completion.is_finished() || self.join.is_finished()
    }

    /// Wait for the thread; `None` if it panicked.
    pub fn join(self) -> Option<T> {
        match self.join.join() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Task '{}' panicked.", self.name);
                None
            }
        }
    }
}
