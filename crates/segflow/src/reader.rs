#![forbid(unsafe_code)]

use std::{io, time::Duration};

use bytes::Bytes;
use segflow_stream::{StreamError, StreamReader, StreamResult};

use crate::ProcessReader;

/// Readable handle of any [`MediaStream`](crate::MediaStream).
///
/// `read` returns an empty chunk at end of stream.
#[derive(Debug)]
pub enum MediaReader {
    Stream(StreamReader),
    Process(ProcessReader),
}

impl MediaReader {
    /// # Errors
    ///
    /// Read timeouts and fatal stream errors.
    pub fn read(&mut self, max: usize) -> StreamResult<Bytes> {
        match self {
            Self::Stream(reader) => reader.read(max),
            Self::Process(reader) => reader.read(max),
        }
    }

    /// # Errors
    ///
    /// [`StreamError::SeekNotSupported`] for process streams and unseekable
    /// sources, otherwise as [`StreamReader::seek`].
    pub fn seek(&mut self, position: u64) -> StreamResult<()> {
        match self {
            Self::Stream(reader) => reader.seek(position),
            Self::Process(_) => Err(StreamError::SeekNotSupported),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Stream(reader) => reader.close(),
            Self::Process(reader) => reader.close(),
        }
    }

    pub fn supports_seek(&self) -> bool {
        match self {
            Self::Stream(reader) => reader.supports_seek(),
            Self::Process(_) => false,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Stream(reader) => reader.content_length(),
            Self::Process(_) => None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Stream(reader) => reader.duration(),
            Self::Process(_) => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Stream(reader) => reader.content_type(),
            Self::Process(_) => None,
        }
    }
}

impl io::Read for MediaReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stream(reader) => io::Read::read(reader, buf),
            Self::Process(reader) => io::Read::read(reader, buf),
        }
    }
}

impl From<StreamReader> for MediaReader {
    fn from(reader: StreamReader) -> Self {
        Self::Stream(reader)
    }
}

impl From<ProcessReader> for MediaReader {
    fn from(reader: ProcessReader) -> Self {
        Self::Process(reader)
    }
}
