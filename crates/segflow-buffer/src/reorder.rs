#![forbid(unsafe_code)]

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::{BufferError, BufferResult, ByteBuffer, DEFAULT_CAPACITY};

/// Tunables for releasing out-of-order segments.
///
/// Segment counts cover every segment received since the buffer was created
/// that the consumer has not fully read yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReorderPolicy {
    /// Segments that must be held before the first release.
    pub min_segments: usize,
    /// A sequence gap may only be skipped once more than this many segments are held.
    pub stall_segments: usize,
    /// Consecutive readiness checks that must see the gap before skipping it.
    pub stall_checks: u32,
}

impl Default for ReorderPolicy {
    fn default() -> Self {
        Self {
            min_segments: 3,
            stall_segments: 10,
            stall_checks: 2,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Chunks still buffered.
    chunks: usize,
    /// No more chunks will arrive.
    finished: bool,
}

/// How far a read may go.
#[derive(Clone, Copy, Debug)]
enum Release {
    /// Up to and including this sequence, keeping order.
    Ordered(u64),
    /// Everything held, skipping missing or unfinished segments.
    Forced,
}

struct ReorderState {
    /// Keyed by `(sequence, arrival)` so chunks of one segment keep write order.
    chunks: BTreeMap<(u64, u64), Bytes>,
    /// Segments received and not yet fully consumed.
    segments: BTreeMap<u64, Slot>,
    arrivals: u64,
    len: usize,
    capacity: usize,
    closed: bool,
    stalls: u32,
    /// Highest sequence handed to the consumer so far.
    last_released: Option<u64>,
    policy: ReorderPolicy,
}

impl ReorderState {
    fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    fn free(&self) -> usize {
        self.capacity.saturating_sub(self.len)
    }

    fn is_finished(&self, sequence: u64) -> bool {
        self.segments.get(&sequence).is_some_and(|slot| slot.finished)
    }

    /// Whether chunks of `sequence` can no longer be delivered in order.
    fn is_late(&self, sequence: u64) -> bool {
        match self.last_released {
            Some(floor) if sequence < floor => true,
            Some(floor) if sequence == floor => !self.segments.contains_key(&floor),
            _ => self.is_finished(sequence),
        }
    }

    /// Next sequence the consumer expects.
    fn cursor(&self) -> Option<u64> {
        match self.last_released {
            Some(floor) if self.is_finished(floor) || !self.segments.contains_key(&floor) => {
                Some(floor + 1)
            }
            Some(floor) => Some(floor),
            None => self.segments.first_key_value().map(|(k, _)| *k),
        }
    }

    /// Last sequence reachable from the cursor through finished segments only.
    fn ordered_limit(&self) -> Option<u64> {
        let mut sequence = self.cursor()?;
        while self.is_finished(sequence) {
            sequence += 1;
        }
        Some(sequence)
    }

    /// Held segments form one run of at least `min_segments`.
    fn initial_ready(&self) -> bool {
        let (Some((&lowest, _)), Some((&highest, _))) =
            (self.segments.first_key_value(), self.segments.last_key_value())
        else {
            return false;
        };
        let held = self.segments.len();
        held >= self.policy.min_segments
            && usize::try_from(highest - lowest + 1).is_ok_and(|span| span == held)
    }

    /// Readiness check. Counts consecutive gap observations and skips the gap
    /// once the stall limits are exceeded.
    fn release(&mut self) -> Option<Release> {
        if self.chunks.is_empty() {
            return None;
        }
        if self.last_released.is_some() || self.initial_ready() {
            let limit = self.ordered_limit()?;
            if self.chunks.range(..=(limit, u64::MAX)).next().is_some() {
                self.stalls = 0;
                return Some(Release::Ordered(limit));
            }
        }

        // Nobody could make room otherwise.
        if self.is_full() {
            return Some(Release::Forced);
        }

        if self.segments.len() > self.policy.stall_segments && self.stalls > self.policy.stall_checks {
            self.stalls = 0;
            self.skip_gap();
            return self.release();
        }
        self.stalls += 1;
        None
    }

    fn skip_gap(&mut self) {
        let cursor = match (self.last_released, self.cursor()) {
            (Some(_), Some(cursor)) => cursor,
            _ => return self.drop_oldest(),
        };
        let Some(resume) = self.chunks.keys().map(|(seq, _)| *seq).find(|&seq| seq > cursor) else {
            return;
        };
        for sequence in cursor..resume {
            self.segments.entry(sequence).or_default().finished = true;
        }
        warn!(from = cursor, to = resume, "reorder: sequence gap persisted, skipping");
    }

    fn drop_oldest(&mut self) {
        let Some((sequence, _)) = self.segments.pop_first() else {
            return;
        };
        let keys: Vec<_> = self
            .chunks
            .range((sequence, 0)..=(sequence, u64::MAX))
            .map(|(k, _)| *k)
            .collect();
        let mut dropped = 0;
        for key in keys {
            if let Some(chunk) = self.chunks.remove(&key) {
                dropped += chunk.len();
            }
        }
        self.len -= dropped;
        warn!(
            sequence,
            dropped,
            held = self.segments.len(),
            "reorder: sequence gap persisted, dropping oldest segment"
        );
    }

    fn insert(&mut self, chunk: Bytes, sequence: u64) {
        self.len += chunk.len();
        self.chunks.insert((sequence, self.arrivals), chunk);
        self.arrivals += 1;
        self.segments.entry(sequence).or_default().chunks += 1;
    }

    fn finish(&mut self, sequence: u64) {
        if self.last_released.is_some_and(|floor| sequence < floor) {
            return;
        }
        let slot = self.segments.entry(sequence).or_default();
        slot.finished = true;
        if slot.chunks == 0 && self.last_released == Some(sequence) {
            self.segments.remove(&sequence);
        }
    }

    fn take(&mut self, max: usize, release: Release) -> Bytes {
        let limit = match release {
            Release::Ordered(limit) => limit,
            Release::Forced => u64::MAX,
        };
        let mut out = BytesMut::with_capacity(max.min(self.len));
        while out.len() < max {
            let Some(mut entry) = self.chunks.first_entry() else {
                break;
            };
            let (sequence, _) = *entry.key();
            if sequence > limit {
                break;
            }
            let chunk = entry.get_mut();
            let n = (max - out.len()).min(chunk.len());
            out.extend_from_slice(&chunk.split_to(n));
            if chunk.is_empty() {
                entry.remove();
                self.consumed(sequence);
            }
            self.pass(sequence);
        }
        self.len -= out.len();
        out.freeze()
    }

    fn consumed(&mut self, sequence: u64) {
        if let Some(slot) = self.segments.get_mut(&sequence) {
            slot.chunks -= 1;
            if slot.chunks == 0 && slot.finished {
                self.segments.remove(&sequence);
            }
        }
    }

    /// Record `sequence` as released; everything below it is settled.
    fn pass(&mut self, sequence: u64) {
        self.last_released = Some(sequence);
        self.segments = self.segments.split_off(&sequence);
    }
}

/// Ring buffer that restores segment order.
///
/// Writers tag chunks with their segment sequence number via
/// [`ByteBuffer::write_seq`] and mark each segment done with
/// [`ByteBuffer::finish_seq`]; the consumer always receives them in ascending
/// sequence order. The first release waits until enough segments are held and
/// the held range has no gaps. After that, data flows only while it continues
/// the last released segment, and a segment is only left behind once it is
/// finished. A gap that never fills is skipped according to [`ReorderPolicy`].
/// Chunks of a segment that was already left behind are discarded on arrival.
///
/// A blocking read whose timeout expires while data is held but gated releases
/// it anyway; a full buffer is always readable.
pub struct ReorderingRingBuffer {
    state: Mutex<ReorderState>,
    used: Condvar,
    free: Condvar,
}

impl ReorderingRingBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, ReorderPolicy::default())
    }

    #[must_use]
    pub fn with_policy(capacity: usize, policy: ReorderPolicy) -> Self {
        Self {
            state: Mutex::new(ReorderState {
                chunks: BTreeMap::new(),
                segments: BTreeMap::new(),
                arrivals: 0,
                len: 0,
                capacity: capacity.max(1),
                closed: false,
                stalls: 0,
                last_released: None,
                policy,
            }),
            used: Condvar::new(),
            free: Condvar::new(),
        }
    }

    /// Segments received and not yet fully consumed.
    pub fn segments(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn policy(&self) -> ReorderPolicy {
        self.state.lock().policy
    }
}

impl Default for ReorderingRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ByteBuffer for ReorderingRingBuffer {
    /// Untagged writes continue the most recent sequence.
    fn write(&self, data: Bytes) {
        let sequence = {
            let state = self.state.lock();
            state
                .segments
                .last_key_value()
                .map(|(k, _)| *k)
                .or(state.last_released)
                .unwrap_or(0)
        };
        self.write_seq(data, sequence);
    }

    fn write_seq(&self, mut data: Bytes, sequence: u64) {
        let mut state = self.state.lock();
        while !data.is_empty() {
            while state.free() == 0 && !state.closed {
                self.free.wait(&mut state);
            }
            if state.closed {
                trace!(dropped = data.len(), "reorder: write after close ignored");
                return;
            }
            if state.is_late(sequence) {
                debug!(
                    sequence,
                    floor = ?state.last_released,
                    dropped = data.len(),
                    "reorder: late chunk dropped"
                );
                return;
            }

            let n = state.free().min(data.len());
            state.insert(data.split_to(n), sequence);
            if state.release().is_some() {
                self.used.notify_all();
            }
        }
    }

    fn finish_seq(&self, sequence: u64) {
        let mut state = self.state.lock();
        state.finish(sequence);
        trace!(sequence, "reorder: segment finished");
        if state.release().is_some() {
            self.used.notify_all();
        }
    }

    fn read(&self, max: usize, block: bool, timeout: Option<Duration>) -> BufferResult<Bytes> {
        let mut state = self.state.lock();
        let mut release = state.release();
        if block {
            let deadline = timeout.map(|t| Instant::now() + t);
            while release.is_none() && !state.closed {
                let timed_out = match deadline {
                    Some(deadline) => self.used.wait_until(&mut state, deadline).timed_out(),
                    None => {
                        self.used.wait(&mut state);
                        false
                    }
                };
                release = state.release();
                if timed_out {
                    break;
                }
            }
            if release.is_none() && state.len == 0 && !state.closed {
                return Err(BufferError::ReadTimeout);
            }
        }
        // Closed, or a blocking wait that ran out with data held.
        if release.is_none() && (block || state.closed) {
            release = Some(Release::Forced);
        }

        let out = match release {
            Some(release) => state.take(max, release),
            None => Bytes::new(),
        };
        if !out.is_empty() {
            self.free.notify_all();
        }
        Ok(out)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.used.notify_all();
        self.free.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn len(&self) -> usize {
        self.state.lock().len
    }

    fn capacity(&self) -> usize {
        self.state.lock().capacity
    }
}
