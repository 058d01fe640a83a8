#![forbid(unsafe_code)]

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::{PoolError, PoolResult, SHUTDOWN_GENERATION};

/// Live job count of one group.
#[derive(Default)]
pub(crate) struct GroupCounter {
    live: Mutex<usize>,
    drained: Condvar,
}

impl GroupCounter {
    fn wait_zero(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut live = self.live.lock();
        while *live > 0 {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut live, deadline).timed_out() {
                        return *live == 0;
                    }
                }
                None => self.drained.wait(&mut live),
            }
        }
        true
    }
}

struct Generations {
    active: u64,
    counters: HashMap<u64, Arc<GroupCounter>>,
}

/// Active generation plus per-group counters.
///
/// The active pointer and counter creation share one lock so a submission
/// can never slip past a generation change unnoticed; each counter has its own
/// lock and condvar for drain waits.
pub(crate) struct GroupTracker {
    generations: Mutex<Generations>,
}

impl GroupTracker {
    pub(crate) fn new(initial: u64) -> Self {
        Self {
            generations: Mutex::new(Generations {
                active: initial,
                counters: HashMap::new(),
            }),
        }
    }

    pub(crate) fn active(&self) -> u64 {
        self.generations.lock().active
    }

    /// Register one live job for `group`.
    pub(crate) fn enter(self: &Arc<Self>, group: u64) -> PoolResult<LiveGuard> {
        let mut generations = self.generations.lock();
        if generations.active == SHUTDOWN_GENERATION {
            return Err(PoolError::Shutdown);
        }
        if generations.active != group {
            return Err(PoolError::StaleGroup {
                group,
                active: generations.active,
            });
        }
        let counter = Arc::clone(generations.counters.entry(group).or_default());
        *counter.live.lock() += 1;
        Ok(LiveGuard {
            group,
            counter,
            tracker: Arc::clone(self),
        })
    }

    /// Move the active pointer. Returns the previous generation.
    pub(crate) fn advance(&self, group: u64) -> PoolResult<u64> {
        let mut generations = self.generations.lock();
        let previous = generations.active;
        if group < previous {
            return Err(PoolError::GenerationRegressed {
                active: previous,
                requested: group,
            });
        }
        generations.active = group;
        generations
            .counters
            .retain(|&g, c| g == group || *c.live.lock() > 0);
        Ok(previous)
    }

    /// Wait for `group` to have no live jobs.
    pub(crate) fn wait_drained(&self, group: u64, timeout: Option<Duration>) -> bool {
        let counter = self.generations.lock().counters.get(&group).cloned();
        counter.is_none_or(|c| c.wait_zero(timeout))
    }

    /// Wait for every group other than the active one.
    pub(crate) fn wait_all_stale(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let stale: Vec<_> = {
            let generations = self.generations.lock();
            generations
                .counters
                .iter()
                .filter(|&(&g, _)| g != generations.active)
                .map(|(_, c)| Arc::clone(c))
                .collect()
        };
        stale.iter().all(|c| {
            c.wait_zero(deadline.map(|d| d.saturating_duration_since(Instant::now())))
        })
    }

    pub(crate) fn live(&self, group: u64) -> usize {
        let counter = self.generations.lock().counters.get(&group).cloned();
        counter.map_or(0, |c| *c.live.lock())
    }

    /// Forget a retired group once its last job finished.
    fn retire(&self, group: u64, counter: &Arc<GroupCounter>) {
        let mut generations = self.generations.lock();
        if generations.active != group
            && *counter.live.lock() == 0
            && generations
                .counters
                .get(&group)
                .is_some_and(|c| Arc::ptr_eq(c, counter))
        {
            generations.counters.remove(&group);
            trace!(group, "pool: group retired");
        }
    }
}

/// Decrements the group's live count when the job ends, however it ends.
pub(crate) struct LiveGuard {
    group: u64,
    counter: Arc<GroupCounter>,
    tracker: Arc<GroupTracker>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let remaining = {
            let mut live = self.counter.live.lock();
            *live -= 1;
            if *live == 0 {
                self.counter.drained.notify_all();
            }
            *live
        };
        if remaining == 0 {
            self.tracker.retire(self.group, &self.counter);
        }
    }
}
