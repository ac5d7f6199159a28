//! Transactional (half) message publishing.
//!
//! A producer stages a half message, runs its local transaction, then tells
//! the broker whether to release the message (commit) or drop it (rollback).
//! If the outcome never arrives, the broker asks the producer's
//! [`TransactionChecker`] to decide.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::broker::MessageBroker;
use crate::message::{Message, MessageId};

/// Outcome of a local transaction, as reported to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalTransactionState {
    /// Release the half message to subscribers.
    Commit,
    /// Discard the half message.
    Rollback,
    /// Undecided; the broker will check back later.
    Unknown,
}

impl LocalTransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalTransactionState::Commit => "commit",
            LocalTransactionState::Rollback => "rollback",
            LocalTransactionState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LocalTransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The business work executed between staging a half message and resolving it.
#[async_trait]
pub trait LocalTransaction: Send + Sync {
    async fn execute(&self, message: &Message) -> LocalTransactionState;
}

/// Decides the outcome of a half message whose resolution never arrived.
#[async_trait]
pub trait TransactionChecker: Send + Sync {
    async fn check(&self, message: &Message) -> LocalTransactionState;
}

/// Result of a transactional send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSendResult {
    pub message_id: MessageId,
    /// The outcome decided by the local transaction.
    pub state: LocalTransactionState,
}

/// Producer for transactional messages, bound to one check-back strategy.
#[derive(Clone)]
pub struct TransactionProducer {
    broker: Arc<dyn MessageBroker>,
    checker: Arc<dyn TransactionChecker>,
}

impl TransactionProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, checker: Arc<dyn TransactionChecker>) -> Self {
        Self { broker, checker }
    }

    /// Stages `message`, runs `local` and reports its outcome.
    ///
    /// Fails only if the half message could not be staged, in which case the
    /// local transaction has not run. A failure to report the outcome is
    /// logged and left to check-back.
    #[tracing::instrument(skip_all, fields(topic = %message.topic))]
    pub async fn send_in_transaction(
        &self,
        message: Message,
        local: &dyn LocalTransaction,
    ) -> Result<TransactionSendResult> {
        let staged = self
            .broker
            .send_half(message.clone(), self.checker.clone())
            .await?;
        tracing::debug!(message_id = %staged.message_id, "half message staged");

        let state = local.execute(&message).await;

        if let Err(e) = self.broker.end_transaction(staged.message_id, state).await {
            tracing::warn!(
                message_id = %staged.message_id,
                %state,
                error = %e,
                "failed to report transaction outcome, leaving it to check-back"
            );
        } else {
            tracing::info!(message_id = %staged.message_id, %state, "transaction outcome reported");
        }

        Ok(TransactionSendResult {
            message_id: staged.message_id,
            state,
        })
    }
}
