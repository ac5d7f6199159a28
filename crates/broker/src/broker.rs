//! The broker contract shared by producers and consumers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::message::{Message, MessageId};
use crate::transaction::{LocalTransactionState, TransactionChecker};

/// Receipt returned when the broker accepts a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendResult {
    pub message_id: MessageId,
}

/// Stream of messages delivered to one consumer group of one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    group: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Waits for the next message. Returns `None` once the broker closes the subscription.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

/// Core trait for message broker clients.
///
/// Implementations must be thread-safe; a single client is shared by every
/// producer and consumer in the process.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a message. If it carries a delay level, delivery is deferred
    /// by that tier.
    async fn publish(&self, message: Message) -> Result<SendResult>;

    /// Stages a half message. It is withheld from subscribers until
    /// [`end_transaction`](Self::end_transaction) commits it; `checker` is
    /// consulted if no outcome arrives.
    async fn send_half(
        &self,
        message: Message,
        checker: Arc<dyn TransactionChecker>,
    ) -> Result<SendResult>;

    /// Resolves a staged half message: commit releases it to subscribers,
    /// rollback discards it, unknown leaves it for check-back.
    async fn end_transaction(
        &self,
        message_id: MessageId,
        state: LocalTransactionState,
    ) -> Result<()>;

    /// Subscribes a consumer group to a topic.
    ///
    /// Every group receives each message once; messages published before the
    /// first subscription are delivered when it arrives.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription>;

    /// Redelivers a message to `group` after a backoff, because its consumer
    /// asked to retry later.
    async fn reconsume_later(&self, message: Message, group: &str) -> Result<()>;

    /// Stops accepting messages and closes all subscriptions.
    async fn shutdown(&self) -> Result<()>;
}
