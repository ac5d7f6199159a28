//! Message broker abstraction.
//!
//! Models the subset of a RocketMQ-style broker the platform relies on:
//! - immediate and delayed publishing on an 18-tier delay ladder
//! - transactional (half) messages resolved by the producer or by check-back
//! - push consumers with bounded concurrency, redelivery backoff and
//!   dead-lettering
//!
//! [`InMemoryBroker`] is the in-process implementation used by the service
//! and the tests.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod producer;
pub mod transaction;

pub use broker::{MessageBroker, SendResult, Subscription};
pub use consumer::{
    ConsumeResult, ConsumerConfig, ConsumerHandle, ConsumerStats, MessageHandler, PushConsumer,
};
pub use error::{BrokerError, Result};
pub use memory::{BrokerConfig, InMemoryBroker, dead_letter_topic};
pub use message::{DelayLevel, Message, MessageId};
pub use producer::{DEFAULT_SEND_RETRIES, Producer};
pub use transaction::{
    LocalTransaction, LocalTransactionState, TransactionChecker, TransactionProducer,
    TransactionSendResult,
};
