#![forbid(unsafe_code)]

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::{PoolError, PoolResult, SHUTDOWN_GENERATION, groups::GroupTracker};

/// Handle passed to every job.
#[derive(Clone)]
pub struct WorkContext {
    group: u64,
    tracker: Arc<GroupTracker>,
}

impl WorkContext {
    /// Group the job was submitted under.
    pub fn group(&self) -> u64 {
        self.group
    }

    /// `false` once the pool has moved past this job's group. Long running
    /// jobs poll this before expensive steps and before publishing results.
    pub fn is_current(&self) -> bool {
        self.tracker.active() == self.group
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("group", &self.group)
            .field("current", &self.is_current())
            .finish()
    }
}

/// Counts live pool threads so shutdown can join them.
#[derive(Default)]
struct ThreadCensus {
    alive: Mutex<usize>,
    exited: Condvar,
}

impl ThreadCensus {
    fn started(&self) {
        *self.alive.lock() += 1;
    }

    fn exited(&self) {
        let mut alive = self.alive.lock();
        *alive = alive.saturating_sub(1);
        if *alive == 0 {
            self.exited.notify_all();
        }
    }

    fn wait_all_exited(&self, deadline: Option<Instant>) -> bool {
        let mut alive = self.alive.lock();
        while *alive > 0 {
            match deadline {
                Some(deadline) => {
                    if self.exited.wait_until(&mut alive, deadline).timed_out() {
                        return *alive == 0;
                    }
                }
                None => self.exited.wait(&mut alive),
            }
        }
        true
    }
}

/// Work-stealing pool (rayon) whose jobs are tagged with a group id.
///
/// ```
/// use segflow_pool::GenerationalPool;
///
/// let pool = GenerationalPool::new("fetch", 2, 0).unwrap();
/// pool.submit(0, |ctx| assert_eq!(ctx.group(), 0)).unwrap();
///
/// pool.set_active_generation(1, true, None).unwrap();
/// assert!(pool.submit(0, |_| {}).is_err());
/// ```
pub struct GenerationalPool {
    name: String,
    pool: Mutex<Option<rayon::ThreadPool>>,
    tracker: Arc<GroupTracker>,
    census: Arc<ThreadCensus>,
    num_threads: usize,
}

impl GenerationalPool {
    /// Build a pool of `num_threads` threads with `initial` as active group.
    ///
    /// # Errors
    ///
    /// [`PoolError::Build`] if rayon cannot spawn the threads.
    pub fn new(name: &str, num_threads: usize, initial: u64) -> PoolResult<Self> {
        let num_threads = num_threads.max(1);
        let census = Arc::new(ThreadCensus::default());
        let prefix = name.to_owned();
        let pool_name = name.to_owned();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .start_handler({
                let census = Arc::clone(&census);
                move |_| census.started()
            })
            .exit_handler({
                let census = Arc::clone(&census);
                move |_| census.exited()
            })
            .panic_handler(move |_| error!(pool = %pool_name, "pool job panicked"))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;

        debug!(pool = name, num_threads, initial, "pool started");
        Ok(Self {
            name: name.to_owned(),
            pool: Mutex::new(Some(pool)),
            tracker: Arc::new(GroupTracker::new(initial)),
            census,
            num_threads,
        })
    }

    /// Queue `job` under `group`.
    ///
    /// A job whose group is no longer active by the time a thread picks it up
    /// is skipped without running.
    ///
    /// # Errors
    ///
    /// - [`PoolError::StaleGroup`] if `group` is not the active generation.
    /// - [`PoolError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn submit<F>(&self, group: u64, job: F) -> PoolResult<()>
    where
        F: FnOnce(WorkContext) + Send + 'static,
    {
        let guard = self.tracker.enter(group)?;
        let ctx = WorkContext {
            group,
            tracker: Arc::clone(&self.tracker),
        };

        let pool = self.pool.lock();
        let Some(pool) = pool.as_ref() else {
            return Err(PoolError::Shutdown);
        };
        pool.spawn(move || {
            let _guard = guard;
            if !ctx.is_current() {
                trace!(group = ctx.group, "pool: stale job abandoned");
                return;
            }
            job(ctx);
        });
        Ok(())
    }

    pub fn active_generation(&self) -> u64 {
        self.tracker.active()
    }

    pub fn is_active(&self, group: u64) -> bool {
        self.tracker.active() == group
    }

    /// Jobs of `group` that are queued or running.
    pub fn live_jobs(&self, group: u64) -> usize {
        self.tracker.live(group)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Make `group` the active generation.
    ///
    /// With `wait_drain`, blocks until the previous generation has no live jobs
    /// (bounded by `timeout`). Returns whether the previous generation drained.
    ///
    /// # Errors
    ///
    /// [`PoolError::GenerationRegressed`] if `group` is older than the active one.
    pub fn set_active_generation(
        &self,
        group: u64,
        wait_drain: bool,
        timeout: Option<Duration>,
    ) -> PoolResult<bool> {
        let previous = self.tracker.advance(group)?;
        debug!(pool = %self.name, previous, group, wait_drain, "pool: generation advanced");
        if !wait_drain || previous == group {
            return Ok(previous == group || self.tracker.live(previous) == 0);
        }
        Ok(self.tracker.wait_drained(previous, timeout))
    }

    /// Block until `group` has no live jobs. Returns `false` on timeout.
    pub fn wait_drained(&self, group: u64, timeout: Option<Duration>) -> bool {
        self.tracker.wait_drained(group, timeout)
    }

    /// Reject all further work, wait for in-flight jobs and join the threads.
    ///
    /// Returns `false` if `timeout` expired first. Idempotent.
    pub fn shutdown(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        if self.tracker.advance(SHUTDOWN_GENERATION).is_err() {
            return true;
        }

        let drained = self.tracker.wait_all_stale(timeout);
        let pool = self.pool.lock().take();
        // Dropping the rayon pool lets its threads exit once idle.
        drop(pool);
        let joined = self.census.wait_all_exited(deadline);
        if !(drained && joined) {
            warn!(pool = %self.name, drained, joined, "pool: shutdown timed out");
        } else {
            debug!(pool = %self.name, "pool: shut down");
        }
        drained && joined
    }
}

impl Drop for GenerationalPool {
    fn drop(&mut self) {
        self.tracker.advance(SHUTDOWN_GENERATION).ok();
    }
}

impl fmt::Debug for GenerationalPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationalPool")
            .field("name", &self.name)
            .field("num_threads", &self.num_threads)
            .field("active", &self.tracker.active())
            .finish()
    }
}
