#![forbid(unsafe_code)]

use std::{sync::Arc, time::Instant};

use segflow_broker::{BrokerError, GetOptions, Message, SendOptions};
use segflow_pool::{GenerationalPool, SHUTDOWN_GENERATION};
use tracing::{debug, info, trace};

use crate::{
    StreamError, StreamResult, StreamState,
    state::{POLL_INTERVAL, Shared},
    topic::{Inbox, Topic, WORKER},
    worker::QueueItem,
};

/// Repositions the stream on behalf of the reader.
///
/// A seek advances the fetch pool to a new group, pauses the worker and every
/// writer, throws away queued segments of the old group, swaps in an empty
/// buffer and restarts everyone under the new group.
pub(crate) struct SeekCoordinator {
    inbox: Inbox,
    shared: Arc<Shared>,
    pool: Arc<GenerationalPool>,
    queue: kanal::Receiver<QueueItem>,
    participants: Vec<String>,
}

impl SeekCoordinator {
    pub(crate) fn new(
        inbox: Inbox,
        shared: Arc<Shared>,
        pool: Arc<GenerationalPool>,
        queue: kanal::Receiver<QueueItem>,
        participants: Vec<String>,
    ) -> Self {
        Self {
            inbox,
            shared,
            pool,
            queue,
            participants,
        }
    }

    pub(crate) fn run(self) {
        debug!("seek coordinator: started");
        loop {
            let mut request = match self.inbox.get(&Topic::SeekEvent, &GetOptions::blocking()) {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(_) => break,
            };
            let result = self.seek(*request.data());
            // Release the reader whatever the outcome; failures are in `shared`.
            request.set_handled();
            match result {
                Ok(()) => {}
                Err(StreamError::Closed) => break,
                Err(err) => self.shared.fail(err),
            }
        }
        debug!("seek coordinator: stopped");
    }

    fn seek(&self, position: u64) -> StreamResult<()> {
        let started = Instant::now();
        self.shared.set_state(StreamState::SeekPending);

        let previous = self.pool.active_generation();
        if previous == SHUTDOWN_GENERATION {
            return Err(StreamError::Closed);
        }
        let group = previous + 1;
        self.pool.set_active_generation(group, false, None)?;
        // Unblocks a writer stuck on a full buffer; its writes become no-ops.
        self.shared.buffer.close();
        debug!(position, previous, group, "seek coordinator: generation advanced");

        let mut paused = Vec::with_capacity(self.participants.len());
        for name in &self.participants {
            match self
                .inbox
                .send(Topic::SeekEvent, position, SendOptions::to(name.as_str()))
            {
                Ok(()) => paused.push(name.as_str()),
                // Thread already gone.
                Err(BrokerError::DeliveryFailed { .. }) => {
                    trace!(participant = %name, "seek coordinator: participant not registered");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mut skip = 0;
        for name in paused {
            let msg = self.wait_paused(name)?;
            if name == WORKER {
                skip = *msg.data();
            }
        }
        self.shared.set_state(StreamState::PausedForRestart);

        let mut stale = 0usize;
        while let Ok(Some(_)) = self.queue.try_recv() {
            stale += 1;
        }
        self.shared.ledger.reset(group);
        self.shared.buffer.reset();
        self.shared.set_skip(skip);
        debug!(stale, skip, "seek coordinator: queue drained, buffer reset");

        self.inbox.send(
            Topic::Restart,
            group,
            SendOptions::broadcast().wait_handled(Some(self.shared.options.seek_timeout)),
        )?;
        self.shared.set_state(StreamState::Running);
        info!(position, group, elapsed = ?started.elapsed(), "seek complete");
        Ok(())
    }

    /// Wait for `name` to report paused, giving up if the stream fails.
    fn wait_paused(&self, name: &str) -> StreamResult<Message<Topic, u64>> {
        let deadline = Instant::now() + self.shared.options.seek_timeout;
        let options = GetOptions::blocking()
            .with_timeout(POLL_INTERVAL)
            .from_source(name);
        loop {
            match self.inbox.get(&Topic::WaitingOnRestart, &options) {
                Ok(Some(mut msg)) => {
                    msg.set_handled();
                    trace!(participant = name, "seek coordinator: participant paused");
                    return Ok(msg);
                }
                Ok(None) => {}
                Err(err) if err.is_timeout() => {}
                Err(err) => return Err(err.into()),
            }
            if let Some(err) = self.shared.error() {
                return Err(err);
            }
            if Instant::now() >= deadline {
                return Err(StreamError::Coordination(BrokerError::MailboxTimeout(format!(
                    "{name} did not pause"
                ))));
            }
        }
    }
}
