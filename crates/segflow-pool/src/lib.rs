#![forbid(unsafe_code)]

//! Generational thread pool.
//!
//! Every submitted job belongs to a *group* (generation). Only the active
//! group accepts new work; advancing the active group makes queued jobs of
//! older groups skip themselves and lets running jobs notice through
//! [`WorkContext::is_current`]. A per-group live counter allows waiting until
//! an old group has fully drained.

mod error;
mod groups;
mod pool;

pub use crate::{
    error::{PoolError, PoolResult},
    pool::{GenerationalPool, WorkContext},
};

/// Generation that no caller can submit to; the pool moves there on shutdown.
pub const SHUTDOWN_GENERATION: u64 = u64::MAX;
