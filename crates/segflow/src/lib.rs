#![forbid(unsafe_code)]

//! # Segflow
//!
//! Facade over the segflow crates: one [`MediaStream`] type for every
//! supported source and one [`MediaReader`] to consume it.
//!
//! ```ignore
//! use segflow::prelude::*;
//!
//! let options = StreamOptions::default();
//! let net = default_net(&options)?;
//! let stream = MediaStream::from_url("https://example.com/live/index.m3u8", net, options)?;
//!
//! let mut reader = stream.open()?;
//! loop {
//!     let chunk = reader.read(8192)?;
//!     if chunk.is_empty() {
//!         break;
//!     }
//!     player.write_all(&chunk)?;
//! }
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod buffer {
    pub use segflow_buffer::*;
}

pub mod broker {
    pub use segflow_broker::*;
}

pub mod pool {
    pub use segflow_pool::*;
}

pub mod net {
    pub use segflow_net::*;
}

pub mod drm {
    pub use segflow_drm::*;
}

pub mod stream {
    pub use segflow_stream::*;
}

pub mod http {
    pub use segflow_http::*;
}

pub mod hls {
    pub use segflow_hls::*;
}

// ── Media streams ───────────────────────────────────────────────────────

mod error;
mod media;
mod process;
mod reader;
mod select;
mod source_type;

pub use error::{MediaError, MediaResult};
pub use media::{MediaStream, default_net};
pub use process::{ProcessReader, ProcessStream};
pub use reader::MediaReader;
pub use select::HttpSelect;
pub use source_type::SourceType;

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use segflow_hls::{HlsStream, NameKey};
    pub use segflow_http::{HttpStream, SegmentedHttpStream};
    pub use segflow_stream::{StreamError, StreamOptions, StreamReader, StreamState};

    pub use crate::{
        HttpSelect, MediaError, MediaReader, MediaStream, ProcessStream, SourceType, default_net,
    };
}
