#![forbid(unsafe_code)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, RwLock};
use segflow_buffer::{ByteBuffer, ReorderPolicy, ReorderingRingBuffer, RingBuffer};
use tracing::{debug, error};

use crate::{SourceInfo, StreamError, StreamOptions};

/// Interval of the short liveness polls between blocking steps.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Running,
    SeekPending,
    PausedForRestart,
    Closed,
}

/// Writers finishing segments out of order need the reordering buffer.
fn make_buffer(capacity: usize, reorder: Option<ReorderPolicy>) -> Arc<dyn ByteBuffer> {
    match reorder {
        Some(policy) => Arc::new(ReorderingRingBuffer::with_policy(capacity, policy)),
        None => Arc::new(RingBuffer::new(capacity)),
    }
}

/// The stream buffer, replaced wholesale on every seek.
pub(crate) struct BufferSlot {
    current: RwLock<Arc<dyn ByteBuffer>>,
    capacity: usize,
    reorder: Option<ReorderPolicy>,
}

impl BufferSlot {
    fn new(options: &StreamOptions) -> Self {
        let reorder = (options.writer_threads > 1).then_some(options.reorder);
        Self {
            current: RwLock::new(make_buffer(options.ringbuffer_size, reorder)),
            capacity: options.ringbuffer_size,
            reorder,
        }
    }

    fn fresh(&self) -> Arc<dyn ByteBuffer> {
        make_buffer(self.capacity, self.reorder)
    }

    pub(crate) fn current(&self) -> Arc<dyn ByteBuffer> {
        Arc::clone(&self.current.read())
    }

    /// Install an empty buffer and close the old one.
    pub(crate) fn reset(&self) {
        let old = std::mem::replace(&mut *self.current.write(), self.fresh());
        old.close();
    }

    pub(crate) fn close(&self) {
        self.current.read().close();
    }
}

struct LedgerState {
    group: u64,
    outstanding: usize,
}

/// Segments of the current group that were queued but not yet written.
///
/// The writer that sees the end marker waits for this to reach zero before
/// ending the stream, so a slower writer still holding an earlier segment is
/// not cut off.
pub(crate) struct Ledger {
    state: Mutex<LedgerState>,
    settled: Condvar,
}

impl Ledger {
    fn new(group: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                group,
                outstanding: 0,
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn queued(&self, group: u64) {
        let mut state = self.state.lock();
        if state.group == group {
            state.outstanding += 1;
        }
    }

    pub(crate) fn finished(&self, group: u64) {
        let mut state = self.state.lock();
        if state.group == group && state.outstanding > 0 {
            state.outstanding -= 1;
            if state.outstanding == 0 {
                self.settled.notify_all();
            }
        }
    }

    pub(crate) fn reset(&self, group: u64) {
        let mut state = self.state.lock();
        state.group = group;
        state.outstanding = 0;
        self.settled.notify_all();
    }

    /// Returns `true` once nothing of `group` is outstanding.
    pub(crate) fn wait_settled(&self, group: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.group == group && state.outstanding > 0 {
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.group != group || state.outstanding == 0
    }
}

/// State shared by the reader and the stream threads.
pub(crate) struct Shared {
    pub(crate) info: SourceInfo,
    pub(crate) options: StreamOptions,
    pub(crate) buffer: BufferSlot,
    pub(crate) ledger: Ledger,
    state: Mutex<StreamState>,
    error: Mutex<Option<StreamError>>,
    skip: Mutex<u64>,
}

impl Shared {
    pub(crate) fn new(info: SourceInfo, options: StreamOptions) -> Self {
        Self {
            buffer: BufferSlot::new(&options),
            ledger: Ledger::new(0),
            info,
            options,
            state: Mutex::new(StreamState::Running),
            error: Mutex::new(None),
            skip: Mutex::new(0),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, next: StreamState) {
        let mut state = self.state.lock();
        if *state != StreamState::Closed && *state != next {
            debug!(from = ?*state, to = ?next, "stream state");
            *state = next;
        }
    }

    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = *state != StreamState::Closed;
        *state = StreamState::Closed;
        was_open
    }

    /// Record a fatal error and end the stream. Only the first error is kept.
    pub(crate) fn fail(&self, err: StreamError) {
        {
            let mut slot = self.error.lock();
            if slot.is_some() {
                return;
            }
            error!(error = %err, "stream failed");
            *slot = Some(err);
        }
        self.buffer.close();
    }

    pub(crate) fn error(&self) -> Option<StreamError> {
        self.error.lock().clone()
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.error.lock().is_some()
    }

    pub(crate) fn set_skip(&self, bytes: u64) {
        *self.skip.lock() = bytes;
    }

    pub(crate) fn take_skip(&self) -> u64 {
        std::mem::take(&mut *self.skip.lock())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::Bytes;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn reset_closes_old_buffer_and_installs_empty_one() {
        let slot = BufferSlot::new(&StreamOptions::new().with_ringbuffer_size(64));
        let old = slot.current();
        old.write(Bytes::from_static(b"stale"));

        slot.reset();
        assert!(old.is_closed());
        let fresh = slot.current();
        assert!(!fresh.is_closed());
        assert!(fresh.is_empty());
    }

    #[rstest]
    fn ledger_ignores_other_groups() {
        let ledger = Ledger::new(1);
        ledger.queued(0);
        ledger.queued(1);
        ledger.finished(0);
        assert!(!ledger.wait_settled(1, Duration::from_millis(10)));
        ledger.finished(1);
        assert!(ledger.wait_settled(1, Duration::from_millis(10)));
    }

    #[rstest]
    #[timeout(Duration::from_secs(5))]
    fn ledger_wakes_waiter_when_settled() {
        let ledger = Arc::new(Ledger::new(0));
        ledger.queued(0);
        let waiter = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || ledger.wait_settled(0, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        ledger.finished(0);
        assert!(waiter.join().unwrap());
    }

    #[rstest]
    fn first_failure_wins_and_closes_buffer() {
        let shared = Shared::new(SourceInfo::default(), StreamOptions::new());
        shared.fail(StreamError::ReadTimeout);
        shared.fail(StreamError::Closed);
        assert_eq!(shared.error(), Some(StreamError::ReadTimeout));
        assert!(shared.buffer.current().is_closed());
    }

    #[rstest]
    fn closed_state_is_terminal() {
        let shared = Shared::new(SourceInfo::default(), StreamOptions::new());
        assert!(shared.mark_closed());
        shared.set_state(StreamState::Running);
        assert_eq!(shared.state(), StreamState::Closed);
        assert!(!shared.mark_closed());
    }
}
