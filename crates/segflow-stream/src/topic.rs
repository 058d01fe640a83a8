#![forbid(unsafe_code)]

use segflow_broker::{Mailbox, MessageBroker};

/// Message kinds of the seek protocol.
///
/// Payloads are `u64`: the target position for `SeekEvent`, the bytes to skip
/// for `WaitingOnRestart` and the new group id for `Restart`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Topic {
    SeekEvent,
    WaitingOnRestart,
    Restart,
}

pub(crate) type Broker = MessageBroker<Topic, u64>;
pub(crate) type Inbox = Mailbox<Topic, u64>;

pub(crate) const READER: &str = "reader";
pub(crate) const WORKER: &str = "worker";
pub(crate) const COORDINATOR: &str = "seek_coordinator";

pub(crate) fn writer_name(index: usize) -> String {
    format!("writer-{index}")
}
