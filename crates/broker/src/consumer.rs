//! Push consumer running message handlers on a bounded worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::broker::MessageBroker;
use crate::message::Message;
use crate::Result;

/// Completion signal returned by a handler for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// The message is done with; acknowledge it.
    Success,
    /// Processing failed transiently; redeliver after a backoff.
    RetryLater,
}

/// Business logic invoked for every delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &Message) -> ConsumeResult;
}

/// Subscription settings for a push consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Maximum number of messages handled at the same time.
    pub concurrency: usize,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            concurrency: 8,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Counters reported when a consumer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub consumed: u64,
    pub retried: u64,
}

#[derive(Debug, Default)]
struct Counters {
    consumed: AtomicU64,
    retried: AtomicU64,
}

/// Handle to a running consumer.
pub struct ConsumerHandle {
    config: ConsumerConfig,
    task: JoinHandle<ConsumerStats>,
}

impl ConsumerHandle {
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Waits for the consumer to stop. It stops once the broker closes the
    /// subscription and every in-flight handler has finished.
    pub async fn join(self) -> ConsumerStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(group = %self.config.group, error = %e, "consumer task failed");
                ConsumerStats::default()
            }
        }
    }
}

/// Starts push consumers.
pub struct PushConsumer;

impl PushConsumer {
    /// Subscribes `handler` to the configured topic and starts dispatching.
    pub async fn start<H: MessageHandler>(
        broker: Arc<dyn MessageBroker>,
        config: ConsumerConfig,
        handler: Arc<H>,
    ) -> Result<ConsumerHandle> {
        let mut subscription = broker.subscribe(&config.topic, &config.group).await?;
        let concurrency = config.concurrency.max(1);
        let group = config.group.clone();

        tracing::info!(topic = %config.topic, %group, concurrency, "consumer started");

        let task = tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(concurrency));
            let counters = Arc::new(Counters::default());

            while let Some(message) = subscription.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                let broker = broker.clone();
                let counters = counters.clone();
                let group = group.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    match handler.handle(&message).await {
                        ConsumeResult::Success => {
                            counters.consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        ConsumeResult::RetryLater => {
                            counters.retried.fetch_add(1, Ordering::Relaxed);
                            metrics::counter!("broker_consume_retries_total").increment(1);
                            tracing::warn!(
                                message_id = %message.id,
                                topic = %message.topic,
                                reconsume_times = message.reconsume_times,
                                "handler asked for redelivery"
                            );
                            if let Err(e) = broker.reconsume_later(message, &group).await {
                                tracing::error!(%group, error = %e, "failed to schedule redelivery");
                            }
                        }
                    }
                });
            }

            // Drain: wait for every in-flight handler to hand its permit back.
            let _ = permits.acquire_many(concurrency as u32).await;
            tracing::info!(group = %group, "consumer stopped");

            ConsumerStats {
                consumed: counters.consumed.load(Ordering::Relaxed),
                retried: counters.retried.load(Ordering::Relaxed),
            }
        });

        Ok(ConsumerHandle { config, task })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::memory::InMemoryBroker;

    /// Records bodies and fails the first `fail_first` deliveries.
    struct Recording {
        seen: Mutex<Vec<Vec<u8>>>,
        fail_first: AtomicU64,
    }

    impl Recording {
        fn new(fail_first: u64) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_first: AtomicU64::new(fail_first),
            }
        }

        fn seen(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageHandler for Recording {
        async fn handle(&self, message: &Message) -> ConsumeResult {
            self.seen.lock().unwrap().push(message.body.clone());
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return ConsumeResult::RetryLater;
            }
            ConsumeResult::Success
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handles_every_message_and_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let handler = Arc::new(Recording::new(0));
        let consumer = PushConsumer::start(
            Arc::new(broker.clone()),
            ConsumerConfig::new("t", "g").with_concurrency(2),
            handler.clone(),
        )
        .await
        .unwrap();

        for i in 0..5u8 {
            broker.publish(Message::new("t", vec![i])).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        broker.shutdown().await.unwrap();
        let stats = consumer.join().await;

        assert_eq!(handler.seen(), 5);
        assert_eq!(stats.consumed, 5);
        assert_eq!(stats.retried, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_later_redelivers_after_backoff() {
        let broker = InMemoryBroker::new();
        let handler = Arc::new(Recording::new(1));
        let _consumer = PushConsumer::start(
            Arc::new(broker.clone()),
            ConsumerConfig::new("t", "g"),
            handler.clone(),
        )
        .await
        .unwrap();

        broker.publish(Message::new("t", vec![1])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.seen(), 1);

        // First retry backs off by the 10s tier.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(handler.seen(), 2);
        assert_eq!(broker.dead_letter_count().await, 0);
    }
}
