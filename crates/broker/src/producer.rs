//! Ordinary message producer with bounded send retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::broker::{MessageBroker, SendResult};
use crate::error::BrokerError;
use crate::message::Message;
use crate::Result;

/// Default number of extra attempts after a failed send.
pub const DEFAULT_SEND_RETRIES: u32 = 2;

/// Process-wide producer handle. Cheap to clone.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn MessageBroker>,
    retries: u32,
    closed: Arc<AtomicBool>,
    // Sends hold a read guard; shutdown takes the write guard to drain them.
    in_flight: Arc<RwLock<()>>,
}

impl Producer {
    /// Creates a producer that retries unavailable sends `retries` more times.
    pub fn new(broker: Arc<dyn MessageBroker>, retries: u32) -> Self {
        Self {
            broker,
            retries,
            closed: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(RwLock::new(())),
        }
    }

    /// Returns the broker this producer publishes to.
    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    /// Sends a message, retrying while the broker reports it is unavailable.
    #[tracing::instrument(skip_all, fields(topic = %message.topic, message_id = %message.id))]
    pub async fn send(&self, message: Message) -> Result<SendResult> {
        let _in_flight = self.in_flight.read().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Shutdown);
        }

        let mut attempt = 0;
        loop {
            match self.broker.publish(message.clone()).await {
                Ok(result) => {
                    metrics::counter!("broker_messages_published_total").increment(1);
                    return Ok(result);
                }
                Err(BrokerError::Unavailable(reason)) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(attempt, %reason, "send failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stops accepting sends and waits for in-flight sends to finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _drained = self.in_flight.write().await;
        tracing::info!("producer shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    fn producer(retries: u32) -> (InMemoryBroker, Producer) {
        let broker = InMemoryBroker::new();
        let producer = Producer::new(Arc::new(broker.clone()), retries);
        (broker, producer)
    }

    #[tokio::test]
    async fn send_delivers_to_subscribers() {
        let (broker, producer) = producer(DEFAULT_SEND_RETRIES);
        let mut sub = broker.subscribe("orders", "g1").await.unwrap();

        let msg = Message::new("orders", b"hello".to_vec());
        let id = msg.id;
        producer.send(msg).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.id, id);
        assert_eq!(received.body, b"hello");
    }

    #[tokio::test]
    async fn send_retries_transient_failures() {
        let (broker, producer) = producer(2);
        broker.fail_next_publishes("orders", 2).await;

        producer
            .send(Message::new("orders", Vec::new()))
            .await
            .unwrap();
        assert_eq!(broker.delivered_count("orders").await, 1);
    }

    #[tokio::test]
    async fn send_gives_up_after_retry_budget() {
        let (broker, producer) = producer(1);
        broker.fail_next_publishes("orders", 2).await;

        let result = producer.send(Message::new("orders", Vec::new())).await;
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
        assert_eq!(broker.delivered_count("orders").await, 0);
    }

    #[tokio::test]
    async fn send_after_shutdown_is_rejected() {
        let (_broker, producer) = producer(0);
        producer.shutdown().await;

        assert!(producer.is_closed());
        let result = producer.send(Message::new("orders", Vec::new())).await;
        assert!(matches!(result, Err(BrokerError::Shutdown)));
    }
}
