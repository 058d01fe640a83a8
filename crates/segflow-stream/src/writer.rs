#![forbid(unsafe_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use kanal::ReceiveErrorTimeout;
use segflow_drm::{DecryptContext, SegmentDecryptor};
use segflow_net::{Net, NetError};
use segflow_pool::{GenerationalPool, PoolError};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    Segment, SegmentKey, StreamError, StreamResult,
    fetch::{self, FetchConfig, FetchHandle, FetchRead},
    state::{POLL_INTERVAL, Shared},
    topic::{Inbox, Topic},
    worker::{QueueItem, pause, poll_seek},
};

enum Outcome {
    Written,
    Dropped,
    /// A seek arrived while the segment was being written.
    Interrupted,
}

/// Fetches queued segments and writes them into the stream buffer.
pub(crate) struct Writer {
    name: String,
    inbox: Inbox,
    queue: kanal::Receiver<QueueItem>,
    shared: Arc<Shared>,
    pool: Arc<GenerationalPool>,
    net: Arc<dyn Net>,
    group: u64,
    inflight: VecDeque<(Segment, FetchHandle)>,
    keys: HashMap<Url, Bytes>,
    ending: bool,
}

impl Writer {
    pub(crate) fn new(
        name: String,
        inbox: Inbox,
        queue: kanal::Receiver<QueueItem>,
        shared: Arc<Shared>,
        pool: Arc<GenerationalPool>,
        net: Arc<dyn Net>,
    ) -> Self {
        Self {
            name,
            inbox,
            queue,
            shared,
            pool,
            net,
            group: 0,
            inflight: VecDeque::new(),
            keys: HashMap::new(),
            ending: false,
        }
    }

    pub(crate) fn run(mut self) {
        debug!(writer = %self.name, "writer: started");
        match self.run_loop() {
            Ok(()) | Err(StreamError::Closed) => {}
            Err(err) => self.shared.fail(err),
        }
        self.inflight.clear();
        debug!(writer = %self.name, group = self.group, "writer: stopped");
    }

    fn run_loop(&mut self) -> StreamResult<()> {
        let lookahead = self.shared.options.lookahead();
        loop {
            if poll_seek(&self.inbox, None)?.is_some() {
                self.pause()?;
                continue;
            }

            while !self.ending && self.inflight.len() < lookahead {
                match self.queue.try_recv() {
                    Ok(Some(item)) => self.accept(item)?,
                    Ok(None) => break,
                    Err(_) => return Err(StreamError::Closed),
                }
            }

            if let Some((segment, handle)) = self.inflight.pop_front() {
                match self.write_segment(&segment, &handle)? {
                    Outcome::Written | Outcome::Dropped => {
                        self.shared.buffer.current().finish_seq(segment.sequence);
                        self.shared.ledger.finished(segment.group);
                    }
                    Outcome::Interrupted => self.pause()?,
                }
                continue;
            }

            if self.ending {
                self.finish()?;
                continue;
            }

            match self.queue.recv_timeout(POLL_INTERVAL) {
                Ok(item) => self.accept(item)?,
                Err(ReceiveErrorTimeout::Timeout) => {}
                Err(_) => return Err(StreamError::Closed),
            }
        }
    }

    fn accept(&mut self, item: QueueItem) -> StreamResult<()> {
        match item {
            QueueItem::Segment(segment) if segment.group != self.group => {
                trace!(sequence = segment.sequence, group = segment.group, "writer: stale segment skipped");
            }
            QueueItem::Segment(segment) => {
                let config = FetchConfig {
                    attempts: self.shared.options.segment_attempts,
                    timeout: self.shared.options.segment_timeout,
                    max_capacity: self.shared.options.ringbuffer_size,
                };
                match fetch::spawn(&self.pool, Arc::clone(&self.net), segment.clone(), config) {
                    Ok(handle) => self.inflight.push_back((segment, handle)),
                    // The coordinator already moved on, a seek event follows.
                    Err(PoolError::StaleGroup { .. }) => {
                        trace!(sequence = segment.sequence, "writer: segment rejected as stale");
                    }
                    Err(PoolError::Shutdown) => return Err(StreamError::Closed),
                    Err(err) => return Err(err.into()),
                }
            }
            QueueItem::End { group } if group == self.group => self.ending = true,
            QueueItem::End { .. } => {}
        }
        Ok(())
    }

    fn write_segment(&mut self, segment: &Segment, handle: &FetchHandle) -> StreamResult<Outcome> {
        let mut decryptor = match &segment.key {
            Some(key) => Some(SegmentDecryptor::new(self.decrypt_context(key, segment.sequence)?)),
            None => None,
        };
        let chunk_size = self.shared.options.fetch_chunk_size;
        let read_timeout = self.shared.options.read_timeout;
        let mut last_data = Instant::now();
        let mut written = 0u64;

        loop {
            if poll_seek(&self.inbox, None)?.is_some() {
                return Ok(Outcome::Interrupted);
            }
            match handle.read(chunk_size, POLL_INTERVAL) {
                FetchRead::Data(chunk) => {
                    last_data = Instant::now();
                    let plain = match decryptor.as_mut() {
                        Some(decryptor) => decryptor.update(&chunk)?,
                        None => chunk,
                    };
                    written += plain.len() as u64;
                    self.emit(segment, plain);
                }
                FetchRead::Pending => {
                    if last_data.elapsed() >= read_timeout {
                        return self.segment_failed(segment, NetError::Timeout);
                    }
                }
                FetchRead::Done => {
                    if let Some(decryptor) = decryptor.take() {
                        let tail = decryptor.finish()?;
                        written += tail.len() as u64;
                        self.emit(segment, tail);
                    }
                    debug!(
                        writer = %self.name,
                        sequence = segment.sequence,
                        bytes = written,
                        is_last = segment.is_last,
                        "writer: segment written"
                    );
                    return Ok(Outcome::Written);
                }
                FetchRead::Failed(err) => return self.segment_failed(segment, err),
            }
        }
    }

    fn emit(&self, segment: &Segment, data: Bytes) {
        if !data.is_empty() {
            self.shared.buffer.current().write_seq(data, segment.sequence);
        }
    }

    fn segment_failed(&self, segment: &Segment, err: NetError) -> StreamResult<Outcome> {
        if self.shared.info.is_live {
            warn!(sequence = segment.sequence, url = %segment.url, error = %err, "writer: dropping segment");
            return Ok(Outcome::Dropped);
        }
        Err(StreamError::SegmentFetch {
            sequence: segment.sequence,
            source: err,
        })
    }

    fn decrypt_context(&mut self, key: &SegmentKey, sequence: u64) -> StreamResult<DecryptContext> {
        let material = match self.keys.get(&key.uri) {
            Some(material) => material.clone(),
            None => {
                let material = self
                    .net
                    .get_bytes(key.uri.clone(), None)
                    .map_err(|e| StreamError::Decryption(format!("failed to load key {}: {e}", key.uri)))?;
                debug!(uri = %key.uri, "writer: key loaded");
                self.keys.insert(key.uri.clone(), material.clone());
                material
            }
        };
        Ok(DecryptContext::for_segment(&material, key.iv, sequence)?)
    }

    /// Wait until every writer has finished the group, then end the stream.
    fn finish(&mut self) -> StreamResult<()> {
        self.ending = false;
        while !self.shared.ledger.wait_settled(self.group, POLL_INTERVAL) {
            if poll_seek(&self.inbox, None)?.is_some() {
                return self.pause();
            }
        }
        self.shared.buffer.close();
        info!(writer = %self.name, group = self.group, "writer: end of stream");

        // Idle until a seek restarts the stream or shutdown closes the mailbox.
        self.inbox
            .wait_on_msg(&Topic::SeekEvent, None, None, false)?;
        self.pause()
    }

    fn pause(&mut self) -> StreamResult<()> {
        self.inflight.clear();
        self.ending = false;
        debug!(writer = %self.name, group = self.group, "writer: waiting on restart");
        self.group = pause(&self.inbox, 0)?;
        debug!(writer = %self.name, group = self.group, "writer: restarted");
        Ok(())
    }
}
