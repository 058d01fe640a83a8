#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use segflow_broker::{GetOptions, SendOptions};
use tracing::{debug, trace};

use crate::{
    Segment, SegmentSource, SourceStep, StreamError, StreamResult,
    state::{POLL_INTERVAL, Shared},
    topic::{COORDINATOR, Inbox, Topic},
};

/// Item of the segment queue between worker and writers.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Segment(Segment),
    /// The source has no more segments for this group.
    End { group: u64 },
}

/// Wait for a seek event. `None` polls, `Some` blocks up to the timeout.
pub(crate) fn poll_seek(inbox: &Inbox, timeout: Option<Duration>) -> StreamResult<Option<u64>> {
    let options = match timeout {
        Some(timeout) => GetOptions::blocking().with_timeout(timeout),
        None => GetOptions::default(),
    };
    match inbox.get(&Topic::SeekEvent, &options) {
        Ok(Some(mut msg)) => {
            msg.set_handled();
            Ok(Some(*msg.data()))
        }
        Ok(None) => Ok(None),
        Err(err) if err.is_timeout() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Report paused to the coordinator and block until restarted.
///
/// Returns the group id to resume with.
pub(crate) fn pause(inbox: &Inbox, skip: u64) -> StreamResult<u64> {
    inbox.send(Topic::WaitingOnRestart, skip, SendOptions::to(COORDINATOR))?;
    let msg = inbox.wait_on_msg(&Topic::Restart, None, None, false)?;
    Ok(*msg.data())
}

/// Produces segments from the source into the segment queue.
pub(crate) struct Worker<S> {
    source: S,
    inbox: Inbox,
    queue: kanal::Sender<QueueItem>,
    shared: Arc<Shared>,
    group: u64,
}

impl<S: SegmentSource> Worker<S> {
    pub(crate) fn new(
        source: S,
        inbox: Inbox,
        queue: kanal::Sender<QueueItem>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            source,
            inbox,
            queue,
            shared,
            group: 0,
        }
    }

    pub(crate) fn run(mut self) {
        debug!("worker: started");
        match self.run_loop() {
            Ok(()) | Err(StreamError::Closed) => {}
            Err(err) => self.shared.fail(err),
        }
        debug!(group = self.group, "worker: stopped");
    }

    fn run_loop(&mut self) -> StreamResult<()> {
        loop {
            if let Some(position) = poll_seek(&self.inbox, None)? {
                self.seek(position)?;
                continue;
            }

            match self.source.next_step()? {
                SourceStep::Segment(segment) => {
                    let segment = segment.in_group(self.group);
                    trace!(sequence = segment.sequence, group = self.group, is_last = segment.is_last, "worker: segment queued");
                    self.shared.ledger.queued(self.group);
                    self.push(QueueItem::Segment(segment))?;
                }
                SourceStep::Wait(delay) => {
                    trace!(?delay, "worker: waiting for source");
                    if let Some(position) = poll_seek(&self.inbox, Some(delay))? {
                        self.seek(position)?;
                    }
                }
                SourceStep::End => {
                    debug!(group = self.group, "worker: source exhausted");
                    if self.push(QueueItem::End { group: self.group })? {
                        self.idle()?;
                    }
                }
            }
        }
    }

    /// Queue `item`, watching for seeks while the queue is full.
    ///
    /// Returns `false` if a seek superseded the item.
    fn push(&mut self, item: QueueItem) -> StreamResult<bool> {
        let mut item = Some(item);
        loop {
            match self.queue.try_send_option(&mut item) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(_) => return Err(StreamError::Closed),
            }
            if let Some(position) = poll_seek(&self.inbox, Some(POLL_INTERVAL))? {
                self.seek(position)?;
                return Ok(false);
            }
        }
    }

    /// Park until a seek (or shutdown) arrives.
    fn idle(&mut self) -> StreamResult<()> {
        let mut msg = self
            .inbox
            .get(&Topic::SeekEvent, &GetOptions::blocking())?
            .ok_or(StreamError::Closed)?;
        msg.set_handled();
        self.seek(*msg.data())
    }

    fn seek(&mut self, position: u64) -> StreamResult<()> {
        let skip = self.source.seek(position)?;
        debug!(position, skip, group = self.group, "worker: waiting on restart");
        self.group = pause(&self.inbox, skip)?;
        debug!(group = self.group, "worker: restarted");
        Ok(())
    }
}
