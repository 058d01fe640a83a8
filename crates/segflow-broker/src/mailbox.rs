#![forbid(unsafe_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{
    BrokerError, BrokerResult, Message, MessageBroker, MessageKind, SendOptions,
};

/// How [`Mailbox::get`] looks for a message.
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Wait for a matching message instead of returning `None`.
    pub block: bool,
    /// Upper bound for a blocking wait. `None` waits until the mailbox closes.
    pub timeout: Option<Duration>,
    /// Only match messages sent from this mailbox.
    pub source: Option<String>,
    /// Return a copy and keep the message queued.
    pub leave: bool,
}

impl GetOptions {
    #[must_use]
    pub fn blocking() -> Self {
        Self {
            block: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn from_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn peek(mut self) -> Self {
        self.leave = true;
        self
    }
}

struct MailboxState<K, T> {
    queues: HashMap<K, VecDeque<Message<K, T>>>,
    closed: bool,
}

impl<K: MessageKind, T: Clone> MailboxState<K, T> {
    fn find(&mut self, kind: &K, source: Option<&str>, leave: bool) -> Option<Message<K, T>> {
        let queue = self.queues.get_mut(kind)?;
        let pos = queue
            .iter()
            .position(|msg| source.is_none_or(|s| msg.source() == Some(s)))?;
        if leave {
            queue.get(pos).map(Message::detached)
        } else {
            queue.remove(pos)
        }
    }
}

/// Queue side of a mailbox, shared with the broker for delivery.
pub(crate) struct MailboxShared<K, T> {
    name: String,
    state: Mutex<MailboxState<K, T>>,
    arrived: Condvar,
}

impl<K: MessageKind, T> MailboxShared<K, T> {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new(MailboxState {
                queues: HashMap::new(),
                closed: false,
            }),
            arrived: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Queue `msg`. A closed mailbox hands the message back.
    pub(crate) fn deliver(&self, msg: Message<K, T>) -> Result<(), Message<K, T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(msg);
        }
        state
            .queues
            .entry(msg.kind().clone())
            .or_default()
            .push_back(msg);
        self.arrived.notify_all();
        Ok(())
    }

    /// Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        let pending: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            self.arrived.notify_all();
            state.queues.drain().collect()
        };
        let count: usize = pending.iter().map(|(_, q)| q.len()).sum();
        // Dropping the queued messages marks them handled.
        drop(pending);
        debug!(mailbox = %self.name, pending = count, "mailbox closed");
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// A named message endpoint owned by one thread.
///
/// Closing (or dropping) the mailbox deregisters it, marks every queued
/// message handled and wakes all threads blocked on it. Every later operation
/// fails with [`BrokerError::MailboxClosed`].
pub struct Mailbox<K: MessageKind, T: Clone + Send + 'static> {
    shared: Arc<MailboxShared<K, T>>,
    broker: MessageBroker<K, T>,
}

impl<K: MessageKind, T: Clone + Send + 'static> Mailbox<K, T> {
    pub(crate) fn new(shared: Arc<MailboxShared<K, T>>, broker: MessageBroker<K, T>) -> Self {
        Self { shared, broker }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.shared.is_closed() {
            return Err(BrokerError::MailboxClosed);
        }
        Ok(())
    }

    /// Receive broadcasts of `kind`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::MailboxClosed`] after close.
    pub fn subscribe(&self, kind: K) -> BrokerResult<()> {
        self.ensure_open()?;
        self.broker.subscribe(self.name(), kind);
        Ok(())
    }

    /// # Errors
    ///
    /// [`BrokerError::NotSubscribed`] if this mailbox is not subscribed to `kind`.
    pub fn unsubscribe(&self, kind: &K) -> BrokerResult<()> {
        self.ensure_open()?;
        self.broker.unsubscribe(self.name(), kind)
    }

    /// Send with this mailbox as the message source.
    ///
    /// # Errors
    ///
    /// See [`MessageBroker::send`].
    pub fn send(&self, kind: K, data: T, options: SendOptions) -> BrokerResult<()> {
        self.ensure_open()?;
        self.broker.send_from(Some(self.name()), kind, data, options)
    }

    /// Take (or peek at) the oldest queued message of `kind`.
    ///
    /// Returns `Ok(None)` when nothing matches and `block` is off.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::MailboxTimeout`] if a blocking wait with a timeout expired.
    /// - [`BrokerError::MailboxClosed`] if the mailbox is or becomes closed.
    pub fn get(&self, kind: &K, options: &GetOptions) -> BrokerResult<Option<Message<K, T>>> {
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let source = options.source.as_deref();
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(BrokerError::MailboxClosed);
            }
            if let Some(msg) = state.find(kind, source, options.leave) {
                trace!(mailbox = %self.shared.name, ?kind, leave = options.leave, "mailbox: message taken");
                return Ok(Some(msg));
            }
            if !options.block {
                return Ok(None);
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.arrived.wait_until(&mut state, deadline).timed_out() {
                        if state.closed {
                            return Err(BrokerError::MailboxClosed);
                        }
                        return state
                            .find(kind, source, options.leave)
                            .map(Some)
                            .ok_or_else(|| BrokerError::MailboxTimeout(format!("{kind:?}")));
                    }
                }
                None => self.shared.arrived.wait(&mut state),
            }
        }
    }

    /// Non-blocking [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// [`BrokerError::MailboxClosed`] after close.
    pub fn try_get(&self, kind: &K) -> BrokerResult<Option<Message<K, T>>> {
        self.get(kind, &GetOptions::default())
    }

    /// Block until a message of `kind` arrives.
    ///
    /// Unless `leave` is set the message is removed and marked handled before
    /// it is returned.
    ///
    /// # Errors
    ///
    /// [`BrokerError::MailboxTimeout`] or [`BrokerError::MailboxClosed`].
    pub fn wait_on_msg(
        &self,
        kind: &K,
        source: Option<&str>,
        timeout: Option<Duration>,
        leave: bool,
    ) -> BrokerResult<Message<K, T>> {
        let mut options = GetOptions::blocking();
        options.timeout = timeout;
        options.source = source.map(str::to_owned);
        options.leave = leave;

        let mut msg = self
            .get(kind, &options)?
            .ok_or_else(|| BrokerError::MailboxTimeout(format!("{kind:?}")))?;
        if !leave {
            msg.set_handled();
        }
        Ok(msg)
    }

    /// Number of queued messages of `kind`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::MailboxClosed`] after close.
    pub fn pending(&self, kind: &K) -> BrokerResult<usize> {
        let state = self.shared.state.lock();
        if state.closed {
            return Err(BrokerError::MailboxClosed);
        }
        Ok(state.queues.get(kind).map_or(0, VecDeque::len))
    }

    /// Close and deregister. Idempotent.
    pub fn close(&self) {
        if self.shared.close() {
            self.broker.deregister(self.name());
        }
    }
}

impl<K: MessageKind, T: Clone + Send + 'static> Drop for Mailbox<K, T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K: MessageKind, T: Clone + Send + 'static> std::fmt::Debug for Mailbox<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.shared.name)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}
