#![forbid(unsafe_code)]

//! `segflow-stream`
//!
//! Turns a sequence of fetchable segments into one continuous byte stream.
//!
//! ## Threads
//! - `Worker`: pulls [`Segment`]s from a [`SegmentSource`] into a bounded queue.
//! - `Writer`: fetches queued segments on a [`GenerationalPool`](segflow_pool::GenerationalPool),
//!   decrypts them and writes them into the stream buffer.
//! - `SeekCoordinator`: pauses worker and writers, swaps the buffer and restarts
//!   them under a new group id when the consumer seeks.
//!
//! The consumer holds a [`StreamReader`] returned by [`SegmentedStream::open`].

mod coordinator;
mod error;
mod fetch;
mod options;
mod reader;
mod segment;
mod source;
mod state;
mod topic;
mod worker;
mod writer;

pub use crate::{
    error::{StreamError, StreamResult},
    options::StreamOptions,
    reader::{SegmentedStream, StreamReader},
    segment::{Segment, SegmentKey},
    source::{SegmentSource, SourceInfo, SourceStep},
    state::StreamState,
};
