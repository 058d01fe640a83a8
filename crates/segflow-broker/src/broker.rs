#![forbid(unsafe_code)]

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    BrokerError, BrokerResult, Mailbox, Message, MessageKind,
    mailbox::MailboxShared,
    message::HandledSignal,
};

/// Delivery parameters for [`MessageBroker::send`].
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    /// Deliver to this mailbox only. `None` broadcasts to subscribers.
    pub target: Option<String>,
    /// Block until every recipient has handled the message.
    pub wait_handled: bool,
    /// Upper bound for `wait_handled`. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    #[must_use]
    pub fn broadcast() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn to<S: Into<String>>(target: S) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// Wait for acknowledgment, at most `timeout`.
    #[must_use]
    pub fn wait_handled(mut self, timeout: Option<Duration>) -> Self {
        self.wait_handled = true;
        self.timeout = timeout;
        self
    }
}

struct Registry<K, T> {
    mailboxes: HashMap<String, Arc<MailboxShared<K, T>>>,
    subscribers: HashMap<K, Vec<String>>,
}

/// Registry of mailboxes and broadcast subscriptions.
///
/// Cloning is cheap; clones share the same registry.
pub struct MessageBroker<K, T> {
    registry: Arc<Mutex<Registry<K, T>>>,
}

impl<K, T> Clone for MessageBroker<K, T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K: MessageKind, T: Clone + Send + 'static> Default for MessageBroker<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind, T: Clone + Send + 'static> MessageBroker<K, T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                mailboxes: HashMap::new(),
                subscribers: HashMap::new(),
            })),
        }
    }

    /// Create the mailbox `name`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::RegistrationFailed`] if the name is taken.
    pub fn register<S: Into<String>>(&self, name: S) -> BrokerResult<Mailbox<K, T>> {
        let name = name.into();
        let mut registry = self.registry.lock();
        if registry.mailboxes.contains_key(&name) {
            return Err(BrokerError::RegistrationFailed(name));
        }
        let shared = Arc::new(MailboxShared::new(name.clone()));
        registry.mailboxes.insert(name.clone(), Arc::clone(&shared));
        debug!(mailbox = %name, "mailbox registered");
        Ok(Mailbox::new(shared, self.clone()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.lock().mailboxes.contains_key(name)
    }

    pub(crate) fn deregister(&self, name: &str) {
        let mut registry = self.registry.lock();
        registry.mailboxes.remove(name);
        registry.subscribers.retain(|_, names| {
            names.retain(|n| n != name);
            !names.is_empty()
        });
    }

    pub(crate) fn subscribe(&self, name: &str, kind: K) {
        let mut registry = self.registry.lock();
        let names = registry.subscribers.entry(kind).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    }

    pub(crate) fn unsubscribe(&self, name: &str, kind: &K) -> BrokerResult<()> {
        let mut registry = self.registry.lock();
        let Some(names) = registry.subscribers.get_mut(kind) else {
            return Err(BrokerError::NotSubscribed(format!("{kind:?}")));
        };
        let Some(pos) = names.iter().position(|n| n == name) else {
            return Err(BrokerError::NotSubscribed(format!("{kind:?}")));
        };
        names.remove(pos);
        if names.is_empty() {
            registry.subscribers.remove(kind);
        }
        Ok(())
    }

    /// Send a message without a source mailbox.
    ///
    /// Targeted messages need no subscription. Without `wait_handled` the
    /// message counts as handled once queued.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::DeliveryFailed`] if the target does not exist or nobody
    ///   subscribes to `kind`.
    /// - [`BrokerError::DeliveryTimeout`] if recipients did not handle the
    ///   message within `timeout`.
    pub fn send(&self, kind: K, data: T, options: SendOptions) -> BrokerResult<()> {
        self.send_from(None, kind, data, options)
    }

    pub(crate) fn send_from(
        &self,
        source: Option<&str>,
        kind: K,
        data: T,
        options: SendOptions,
    ) -> BrokerResult<()> {
        let recipients = self.recipients(&kind, options.target.as_deref())?;
        let targeted = options.target.is_some();
        let source = source.map(str::to_owned);

        let (reply_tx, reply_rx) = kanal::bounded::<()>(recipients.len());
        let mut delivered = 0usize;
        for mailbox in &recipients {
            let signal = if options.wait_handled {
                HandledSignal::new(reply_tx.clone())
            } else {
                HandledSignal::none()
            };
            let msg = Message::new(kind.clone(), data.clone(), source.clone(), signal);
            match mailbox.deliver(msg) {
                Ok(()) => delivered += 1,
                Err(mut msg) => {
                    msg.disarm();
                    if targeted {
                        return Err(BrokerError::delivery_failed(
                            format!("{kind:?}"),
                            format!("mailbox `{}` closed", mailbox.name()),
                        ));
                    }
                    trace!(mailbox = mailbox.name(), ?kind, "broker: skipped closed subscriber");
                }
            }
        }
        drop(reply_tx);
        trace!(?kind, delivered, wait = options.wait_handled, "broker: delivered");

        if !options.wait_handled {
            return Ok(());
        }

        let deadline = options.timeout.map(|t| Instant::now() + t);
        let mut handled = 0usize;
        while handled < delivered {
            let received = match deadline {
                None => reply_rx.recv().is_ok(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match reply_rx.recv_timeout(remaining) {
                        Ok(()) => true,
                        Err(kanal::ReceiveErrorTimeout::Timeout) => {
                            warn!(?kind, pending = delivered - handled, "broker: handled wait timed out");
                            return Err(BrokerError::DeliveryTimeout {
                                kind: format!("{kind:?}"),
                                pending: delivered - handled,
                            });
                        }
                        Err(_) => false,
                    }
                }
            };
            if !received {
                // Every reply handle is gone, so every recipient fired it.
                break;
            }
            handled += 1;
        }
        Ok(())
    }

    fn recipients(&self, kind: &K, target: Option<&str>) -> BrokerResult<Vec<Arc<MailboxShared<K, T>>>> {
        let registry = self.registry.lock();
        match target {
            Some(target) => registry
                .mailboxes
                .get(target)
                .cloned()
                .map(|mailbox| vec![mailbox])
                .ok_or_else(|| {
                    BrokerError::delivery_failed(
                        format!("{kind:?}"),
                        format!("target mailbox `{target}` does not exist"),
                    )
                }),
            None => {
                let recipients: Vec<_> = registry
                    .subscribers
                    .get(kind)
                    .into_iter()
                    .flatten()
                    .filter_map(|name| registry.mailboxes.get(name).cloned())
                    .collect();
                if recipients.is_empty() {
                    return Err(BrokerError::delivery_failed(
                        format!("{kind:?}"),
                        "no subscribers",
                    ));
                }
                Ok(recipients)
            }
        }
    }

    /// Close every registered mailbox, waking all blocked threads.
    pub fn close_all(&self) {
        let mailboxes: Vec<_> = {
            let mut registry = self.registry.lock();
            registry.subscribers.clear();
            registry.mailboxes.drain().map(|(_, m)| m).collect()
        };
        for mailbox in mailboxes {
            mailbox.close();
        }
    }
}
