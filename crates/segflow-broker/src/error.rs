use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Unable to register mailbox `{0}`: name already taken")]
    RegistrationFailed(String),

    #[error("Not subscribed to message `{0}`")]
    NotSubscribed(String),

    #[error("Unable to deliver `{kind}`: {reason}")]
    DeliveryFailed { kind: String, reason: String },

    #[error("Timed out waiting on {pending} recipient(s) to handle `{kind}`")]
    DeliveryTimeout { kind: String, pending: usize },

    #[error("Timed out waiting for message `{0}`")]
    MailboxTimeout(String),

    #[error("Mailbox closed")]
    MailboxClosed,
}

impl BrokerError {
    pub(crate) fn delivery_failed<R: Into<String>>(kind: String, reason: R) -> Self {
        Self::DeliveryFailed {
            kind,
            reason: reason.into(),
        }
    }

    /// Closed mailboxes only happen while a stream is shutting down.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::MailboxClosed)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::MailboxTimeout(_) | Self::DeliveryTimeout { .. })
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
