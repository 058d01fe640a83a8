#![forbid(unsafe_code)]

//! Segment fetch jobs.
//!
//! Each job streams one segment body into its own bounded [`RingBuffer`]. The
//! writer drains it while the download is still running.
//!
//! Every attempt is bounded by `segment_timeout`. The reading side enforces
//! the bound, so it holds for any [`Net`], including one that blocks forever.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use segflow_buffer::{BufferError, ByteBuffer, RingBuffer};
use segflow_net::{Net, NetError, NetResult};
use segflow_pool::{GenerationalPool, PoolResult, WorkContext};
use tracing::{debug, trace, warn};

use crate::Segment;

/// Buffer size used until the response announces its length.
const INITIAL_CAPACITY: usize = 1024 * 1024;

struct FetchState {
    buffer: RingBuffer,
    error: Mutex<Option<NetError>>,
    /// Start of the running attempt, `None` while the job is queued.
    attempt_started: Mutex<Option<Instant>>,
}

impl FetchState {
    fn fail(&self, err: NetError) {
        *self.error.lock() = Some(err);
        self.buffer.close();
    }

    fn start_attempt(&self) {
        *self.attempt_started.lock() = Some(Instant::now());
    }

    fn attempt_expired(&self, timeout: Duration) -> bool {
        self.attempt_started
            .lock()
            .is_some_and(|started| started.elapsed() >= timeout)
    }
}

/// Closes the segment buffer when the job ends, including when the pool
/// drops it unrun because its group went stale.
struct CloseOnDrop(Arc<FetchState>);

impl CloseOnDrop {
    fn state(&self) -> &FetchState {
        &self.0
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.buffer.close();
    }
}

/// Result of one read from a fetch in progress.
#[derive(Debug)]
pub(crate) enum FetchRead {
    Data(Bytes),
    Pending,
    Done,
    Failed(NetError),
}

/// Writer-side end of a fetch job. Dropping it cancels the download.
pub(crate) struct FetchHandle {
    state: Arc<FetchState>,
    attempt_timeout: Duration,
}

impl FetchHandle {
    /// Data already fetched is returned even after the attempt has expired.
    pub(crate) fn read(&self, max: usize, timeout: Duration) -> FetchRead {
        match self.state.buffer.read(max, true, Some(timeout)) {
            Ok(chunk) if chunk.is_empty() => match self.state.error.lock().clone() {
                Some(err) => FetchRead::Failed(err),
                None => FetchRead::Done,
            },
            Ok(chunk) => FetchRead::Data(chunk),
            Err(BufferError::ReadTimeout) if self.state.attempt_expired(self.attempt_timeout) => {
                warn!(timeout = ?self.attempt_timeout, "fetch: attempt timed out");
                self.state.fail(NetError::Timeout);
                FetchRead::Failed(NetError::Timeout)
            }
            Err(BufferError::ReadTimeout) => FetchRead::Pending,
        }
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.state.buffer.close();
    }
}

/// Settings a fetch job needs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FetchConfig {
    pub(crate) attempts: u32,
    /// Bound on one attempt, from request to the last body byte.
    pub(crate) timeout: Duration,
    pub(crate) max_capacity: usize,
}

/// Queue a fetch of `segment` under its group.
pub(crate) fn spawn(
    pool: &GenerationalPool,
    net: Arc<dyn Net>,
    segment: Segment,
    config: FetchConfig,
) -> PoolResult<FetchHandle> {
    let state = Arc::new(FetchState {
        buffer: RingBuffer::new(INITIAL_CAPACITY.min(config.max_capacity)),
        error: Mutex::new(None),
        attempt_started: Mutex::new(None),
    });
    let guard = CloseOnDrop(Arc::clone(&state));
    pool.submit(segment.group, move |ctx| {
        fetch_segment(&ctx, net.as_ref(), &segment, guard.state(), config);
    })?;
    Ok(FetchHandle {
        state,
        attempt_timeout: config.timeout,
    })
}

fn fetch_segment(
    ctx: &WorkContext,
    net: &dyn Net,
    segment: &Segment,
    state: &FetchState,
    config: FetchConfig,
) {
    let attempts = config.attempts.max(1);
    let mut delivered = 0u64;
    let mut last_error = None;

    for attempt in 1..=attempts {
        if !ctx.is_current() || state.buffer.is_closed() {
            trace!(sequence = segment.sequence, group = ctx.group(), "fetch: cancelled");
            return;
        }
        state.start_attempt();
        match stream_body(ctx, net, segment, state, config, &mut delivered) {
            Ok(true) => {
                debug!(sequence = segment.sequence, bytes = delivered, "fetch: segment complete");
                return;
            }
            Ok(false) => {
                trace!(sequence = segment.sequence, group = ctx.group(), "fetch: cancelled mid-body");
                return;
            }
            Err(err) => {
                warn!(
                    sequence = segment.sequence,
                    url = %segment.url,
                    attempt,
                    attempts,
                    error = %err,
                    "fetch: attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    if let Some(err) = last_error {
        state.fail(err);
    }
}

/// Stream the body into the segment buffer. Bytes already delivered by an
/// earlier attempt are skipped. Returns `false` if the job was cancelled.
fn stream_body(
    ctx: &WorkContext,
    net: &dyn Net,
    segment: &Segment,
    state: &FetchState,
    config: FetchConfig,
    delivered: &mut u64,
) -> NetResult<bool> {
    let body = match segment.range {
        Some(range) => net.get_range(segment.url.clone(), range, None)?,
        None => net.stream(segment.url.clone(), None)?,
    };
    if let Some(len) = body.content_length() {
        let capacity = usize::try_from(len).unwrap_or(usize::MAX);
        state
            .buffer
            .resize(capacity.clamp(1, config.max_capacity.max(1)));
    }

    let mut offset = 0u64;
    for chunk in body {
        let chunk = chunk?;
        if !ctx.is_current() {
            return Ok(false);
        }
        let len = chunk.len() as u64;
        let end = offset + len;
        if end > *delivered {
            let skip = usize::try_from(delivered.saturating_sub(offset)).unwrap_or(0);
            state.buffer.write(chunk.slice(skip..));
            *delivered = end;
        }
        offset = end;
        if state.buffer.is_closed() {
            return Ok(false);
        }
    }
    state.buffer.close();
    Ok(true)
}
