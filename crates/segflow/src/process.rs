#![forbid(unsafe_code)]

//! Raw stream read from a child process's stdout.

use std::{
    ffi::OsString,
    fmt,
    io::{self, Read},
    process::{Child, ChildStdout, Command, Stdio},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use segflow_buffer::{ByteBuffer, RingBuffer};
use segflow_stream::{StreamError, StreamOptions, StreamResult};
use tracing::{debug, warn};

use crate::{MediaError, MediaResult};

/// How long a freshly spawned process may run before it counts as started.
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Command whose stdout is the media stream, e.g. a stream dumper.
#[derive(Clone)]
pub struct ProcessStream {
    program: OsString,
    args: Vec<OsString>,
    options: StreamOptions,
    startup_grace: Duration,
}

impl ProcessStream {
    pub fn new(program: impl Into<OsString>, options: StreamOptions) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            options,
            startup_grace: STARTUP_GRACE,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Human-readable command line.
    pub fn cmdline(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn the process and start pumping its stdout.
    ///
    /// # Errors
    ///
    /// [`MediaError::Process`] if the process cannot be spawned or exits
    /// unsuccessfully within the startup grace period.
    pub fn open(&self) -> MediaResult<ProcessReader> {
        debug!(cmdline = %self.cmdline(), "process: spawning");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MediaError::Process(format!("{}: {e}", self.cmdline())))?;

        thread::sleep(self.startup_grace);
        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                return Err(MediaError::Process(format!(
                    "{} exited prematurely with {status}",
                    self.cmdline()
                )));
            }
            Ok(_) => {}
            Err(err) => return Err(MediaError::Process(err.to_string())),
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Process("stdout not captured".to_owned()))?;
        let buffer = Arc::new(RingBuffer::new(self.options.ringbuffer_size));
        let chunk_size = self.options.fetch_chunk_size.max(1);
        let pump_buffer = Arc::clone(&buffer);
        let pump = thread::Builder::new()
            .name("segflow-process".to_owned())
            .spawn(move || pump_stdout(stdout, &pump_buffer, chunk_size));

        let pump = match pump {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(kill_err) = child.kill() {
                    warn!(%kill_err, "process: kill failed");
                }
                return Err(StreamError::Spawn(err.to_string()).into());
            }
        };

        Ok(ProcessReader {
            child,
            buffer,
            pump: Some(pump),
            read_timeout: self.options.read_timeout,
            closed: false,
        })
    }
}

impl fmt::Debug for ProcessStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessStream")
            .field("cmdline", &self.cmdline())
            .finish()
    }
}

fn pump_stdout(mut stdout: ChildStdout, buffer: &RingBuffer, chunk_size: usize) {
    let mut total = 0u64;
    loop {
        let mut chunk = BytesMut::zeroed(chunk_size);
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                chunk.truncate(n);
                total += n as u64;
                buffer.write(chunk.freeze());
                if buffer.is_closed() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(%err, "process: stdout read failed");
                break;
            }
        }
    }
    debug!(total, "process: stdout drained");
    buffer.close();
}

/// Consumer handle of a [`ProcessStream`]. Not seekable.
pub struct ProcessReader {
    child: Child,
    buffer: Arc<RingBuffer>,
    pump: Option<JoinHandle<()>>,
    read_timeout: Duration,
    closed: bool,
}

impl ProcessReader {
    /// Read up to `max` bytes. An empty chunk means the process closed stdout.
    ///
    /// # Errors
    ///
    /// [`StreamError::ReadTimeout`] if no output arrived within the read
    /// timeout, [`StreamError::Closed`] after [`close`](Self::close).
    pub fn read(&mut self, max: usize) -> StreamResult<Bytes> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.buffer
            .read(max, true, Some(self.read_timeout))
            .map_err(StreamError::from)
    }

    /// Kill the process and stop the pump. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.close();
        if let Err(err) = self.child.kill() {
            debug!(%err, "process: already exited");
        }
        match self.child.wait() {
            Ok(status) => debug!(%status, "process: exited"),
            Err(err) => warn!(%err, "process: wait failed"),
        }
        if let Some(pump) = self.pump.take()
            && pump.join().is_err()
        {
            warn!("process: pump thread panicked");
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Read for ProcessReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match ProcessReader::read(self, buf.len()) {
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

impl Drop for ProcessReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ProcessReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessReader")
            .field("pid", &self.child.id())
            .field("buffered", &self.buffer.len())
            .field("closed", &self.closed)
            .finish()
    }
}
