#![forbid(unsafe_code)]

//! Mailbox based coordination for stream threads.
//!
//! A [`MessageBroker`] owns a registry of named [`Mailbox`]es. Messages are
//! delivered either to one target or broadcast to every mailbox subscribed to
//! the message kind. A sender may wait until every recipient has handled the
//! message: each delivered [`Message`] carries one end of a reply channel and
//! signals it when handled (explicitly or on drop).

mod broker;
mod error;
mod mailbox;
mod message;

pub use crate::{
    broker::{MessageBroker, SendOptions},
    error::{BrokerError, BrokerResult},
    mailbox::{GetOptions, Mailbox},
    message::Message,
};

use std::{fmt::Debug, hash::Hash};

/// Bound for message kind identifiers.
pub trait MessageKind: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K> MessageKind for K where K: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
