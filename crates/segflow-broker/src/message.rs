#![forbid(unsafe_code)]

use std::fmt;

use tracing::trace;

/// Reply half of an acknowledged delivery. Fires at most once.
pub(crate) struct HandledSignal(Option<kanal::Sender<()>>);

impl fmt::Debug for HandledSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandledSignal")
            .field(&self.is_pending())
            .finish()
    }
}

impl HandledSignal {
    pub(crate) fn new(reply: kanal::Sender<()>) -> Self {
        Self(Some(reply))
    }

    pub(crate) fn none() -> Self {
        Self(None)
    }

    fn fire(&mut self) {
        if let Some(reply) = self.0.take() {
            // Sender may have given up waiting.
            if reply.send(()).is_err() {
                trace!("broker: handled signal after sender timeout");
            }
        }
    }

    fn disarm(&mut self) {
        self.0 = None;
    }

    fn is_pending(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for HandledSignal {
    fn drop(&mut self) {
        self.fire();
    }
}

/// A delivered message.
///
/// Dropping the message marks it handled, so a receiver that takes a message
/// out of its mailbox always releases a waiting sender eventually. Call
/// [`set_handled`](Self::set_handled) to acknowledge before finishing work
/// with the payload.
#[derive(Debug)]
pub struct Message<K, T> {
    kind: K,
    data: T,
    source: Option<String>,
    handled: HandledSignal,
}

impl<K, T> Message<K, T> {
    pub(crate) fn new(kind: K, data: T, source: Option<String>, handled: HandledSignal) -> Self {
        Self {
            kind,
            data,
            source,
            handled,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Name of the sending mailbox, if sent from one.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn set_handled(&mut self) {
        self.handled.fire();
    }

    /// `true` while a sender is still waiting for this message.
    pub fn is_ack_pending(&self) -> bool {
        self.handled.is_pending()
    }

    /// Drop the acknowledgment handle without signalling.
    pub(crate) fn disarm(&mut self) {
        self.handled.disarm();
    }

    /// Consume the message, marking it handled.
    pub fn into_data(self) -> T {
        let Self { data, .. } = self;
        data
    }
}

impl<K: Clone, T: Clone> Message<K, T> {
    /// Copy without the acknowledgment handle, used for peeking.
    pub(crate) fn detached(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            data: self.data.clone(),
            source: self.source.clone(),
            handled: HandledSignal::none(),
        }
    }
}
