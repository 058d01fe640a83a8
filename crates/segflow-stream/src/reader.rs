#![forbid(unsafe_code)]

use std::{
    fmt, io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use segflow_broker::SendOptions;
use segflow_buffer::BufferError;
use segflow_net::Net;
use segflow_pool::GenerationalPool;
use tracing::{debug, warn};

use crate::{
    SegmentSource, SourceInfo, StreamError, StreamOptions, StreamResult, StreamState,
    coordinator::SeekCoordinator,
    state::Shared,
    topic::{Broker, COORDINATOR, Inbox, READER, Topic, WORKER, writer_name},
    worker::Worker,
    writer::Writer,
};

/// A not yet opened segmented stream.
pub struct SegmentedStream<S> {
    source: S,
    net: Arc<dyn Net>,
    options: StreamOptions,
}

impl<S: SegmentSource> SegmentedStream<S> {
    pub fn new(source: S, net: Arc<dyn Net>, options: StreamOptions) -> Self {
        Self {
            source,
            net,
            options,
        }
    }

    pub fn info(&self) -> SourceInfo {
        self.source.info()
    }

    /// Start the worker, writer and coordinator threads.
    ///
    /// # Errors
    ///
    /// [`StreamError::Pool`] or [`StreamError::Spawn`] if threads cannot be
    /// created, [`StreamError::Coordination`] if mailbox setup fails.
    pub fn open(self) -> StreamResult<StreamReader> {
        let Self {
            source,
            net,
            options,
        } = self;
        let info = source.info();
        debug!(?info, writers = options.writer_threads, "stream: opening");

        let shared = Arc::new(Shared::new(info, options.clone()));
        let broker = Broker::new();
        let pool = Arc::new(GenerationalPool::new(
            "segflow-fetch",
            options.segment_threads,
            0,
        )?);
        let (queue_tx, queue_rx) = kanal::bounded(options.segment_queue_size.max(1));

        let inbox = broker.register(READER)?;
        let coordinator_inbox = broker.register(COORDINATOR)?;
        let worker_inbox = broker.register(WORKER)?;
        worker_inbox.subscribe(Topic::Restart)?;

        let mut participants = vec![WORKER.to_owned()];
        let mut writers = Vec::with_capacity(options.writer_threads);
        for index in 0..options.writer_threads.max(1) {
            let name = writer_name(index);
            let writer_inbox = broker.register(name.as_str())?;
            writer_inbox.subscribe(Topic::Restart)?;
            participants.push(name.clone());
            writers.push(Writer::new(
                name,
                writer_inbox,
                queue_rx.clone(),
                Arc::clone(&shared),
                Arc::clone(&pool),
                Arc::clone(&net),
            ));
        }

        let mut reader = StreamReader {
            shared: Arc::clone(&shared),
            broker: broker.clone(),
            inbox,
            pool: Arc::clone(&pool),
            threads: Vec::new(),
            position: 0,
            skip: 0,
        };

        let coordinator = SeekCoordinator::new(
            coordinator_inbox,
            Arc::clone(&shared),
            Arc::clone(&pool),
            queue_rx,
            participants,
        );
        reader.spawn("segflow-seek", move || coordinator.run())?;

        for writer in writers {
            reader.spawn("segflow-writer", move || writer.run())?;
        }

        let worker = Worker::new(source, worker_inbox, queue_tx, Arc::clone(&shared));
        reader.spawn("segflow-worker", move || worker.run())?;

        Ok(reader)
    }
}

const SKIP_CHUNK: usize = 64 * 1024;

/// Consumer handle of an open stream.
///
/// `read` returns an empty chunk at end of stream. Dropping the reader closes
/// the stream.
pub struct StreamReader {
    shared: Arc<Shared>,
    broker: Broker,
    inbox: Inbox,
    pool: Arc<GenerationalPool>,
    threads: Vec<JoinHandle<()>>,
    position: u64,
    skip: u64,
}

impl StreamReader {
    fn spawn<F>(&mut self, name: &str, body: F) -> StreamResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(body)
            .map_err(|e| StreamError::Spawn(e.to_string()));
        match handle {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    /// Read up to `max` bytes, blocking up to the read timeout.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ReadTimeout`] if no data arrived in time.
    /// - The fatal error that ended the stream, once buffered data is drained.
    /// - [`StreamError::Closed`] after [`close`](Self::close).
    pub fn read(&mut self, max: usize) -> StreamResult<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        let timeout = self.shared.options.read_timeout;
        loop {
            if self.shared.state() == StreamState::Closed {
                return Err(StreamError::Closed);
            }
            let buffer = self.shared.buffer.current();
            // Bytes of the target segment that precede the seek position.
            let skipping = self.skip > 0;
            let want = if skipping {
                usize::try_from(self.skip).map_or(SKIP_CHUNK, |skip| skip.min(SKIP_CHUNK))
            } else {
                max
            };
            let chunk = match buffer.read(want, true, Some(timeout)) {
                Ok(chunk) => chunk,
                Err(BufferError::ReadTimeout) => return Err(StreamError::ReadTimeout),
            };

            if chunk.is_empty() {
                return match self.shared.error() {
                    Some(err) => Err(err),
                    None => Ok(chunk),
                };
            }
            if skipping {
                self.skip -= chunk.len() as u64;
                continue;
            }

            self.position += chunk.len() as u64;
            return Ok(chunk);
        }
    }

    /// Reposition to byte `position` of the logical stream.
    ///
    /// Blocks until worker and writers have restarted at the new position.
    ///
    /// # Errors
    ///
    /// - [`StreamError::SeekNotSupported`] for sources without a seek index.
    /// - [`StreamError::InvalidSeek`] past the end of the stream.
    /// - [`StreamError::Coordination`] if the restart did not complete in time.
    pub fn seek(&mut self, position: u64) -> StreamResult<()> {
        if self.shared.state() == StreamState::Closed {
            return Err(StreamError::Closed);
        }
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        let info = &self.shared.info;
        if !info.supports_seek {
            return Err(StreamError::SeekNotSupported);
        }
        if info.content_length.is_some_and(|len| position >= len) {
            return Err(StreamError::InvalidSeek {
                position,
                length: info.content_length,
            });
        }

        debug!(position, "reader: seek requested");
        self.inbox.send(
            Topic::SeekEvent,
            position,
            SendOptions::to(COORDINATOR).wait_handled(Some(self.shared.options.seek_timeout)),
        )?;
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        self.skip = self.shared.take_skip();
        self.position = position;
        Ok(())
    }

    /// Stop every stream thread and release the buffer. Idempotent.
    pub fn close(&mut self) {
        if !self.shared.mark_closed() {
            return;
        }
        debug!("reader: closing stream");
        self.shared.buffer.close();
        self.broker.close_all();
        if !self.pool.shutdown(Some(self.shared.options.seek_timeout)) {
            warn!("reader: fetch pool did not drain before shutdown timeout");
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("reader: stream thread panicked");
            }
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn info(&self) -> &SourceInfo {
        &self.shared.info
    }

    pub fn supports_seek(&self) -> bool {
        self.shared.info.supports_seek
    }

    pub fn content_length(&self) -> Option<u64> {
        self.shared.info.content_length
    }

    pub fn duration(&self) -> Option<Duration> {
        self.shared.info.duration
    }

    pub fn content_type(&self) -> Option<&str> {
        self.shared.info.content_type.as_deref()
    }

    /// Logical byte position of the next read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fatal error that ended the stream, if any.
    pub fn error(&self) -> Option<StreamError> {
        self.shared.error()
    }
}

impl io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match StreamReader::read(self, buf.len()) {
            Ok(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Err(StreamError::ReadTimeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, StreamError::ReadTimeout))
            }
            Err(err) => Err(io::Error::other(err)),
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("state", &self.shared.state())
            .field("position", &self.position)
            .field("info", &self.shared.info)
            .finish()
    }
}
