#![forbid(unsafe_code)]

//! HTTP sources.
//!
//! - [`RangeSlicer`] splits a resource of known length into fixed-size byte
//!   ranges that are fetched in parallel and support seeking.
//! - [`ProgressiveSource`] fetches the resource as one streamed body.
//!
//! [`HttpStream`] and [`SegmentedHttpStream`] wire them to the stream engine.

mod error;
mod probe;
mod progressive;
mod slicer;
mod stream;

pub use crate::{
    error::{HttpError, HttpResult},
    probe::{HttpProbe, probe},
    progressive::ProgressiveSource,
    slicer::RangeSlicer,
    stream::{HttpStream, SegmentedHttpStream},
};
