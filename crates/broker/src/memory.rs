use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::broker::{MessageBroker, SendResult, Subscription};
use crate::error::BrokerError;
use crate::message::{DelayLevel, Message, MessageId};
use crate::Result;
use crate::transaction::{LocalTransactionState, TransactionChecker};

/// Tuning knobs for the in-memory broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How often unresolved half messages are checked back.
    pub check_interval: Duration,
    /// Half messages younger than this are not checked back yet.
    pub check_immunity: Duration,
    /// Unresolved check-backs after which a half message is discarded.
    pub max_checks: u32,
    /// Redeliveries after which a message goes to the dead-letter queue.
    pub max_reconsume_times: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            check_immunity: Duration::from_secs(6),
            max_checks: 15,
            max_reconsume_times: 16,
        }
    }
}

/// Name of the dead-letter queue of a consumer group.
pub fn dead_letter_topic(group: &str) -> String {
    format!("%DLQ%{group}")
}

/// First backoff tier used for redelivery (10s).
const RETRY_BASE_LEVEL: u8 = 3;

struct HalfMessage {
    message: Message,
    checker: Arc<dyn TransactionChecker>,
    staged_at: Instant,
    checks: u32,
}

#[derive(Default)]
struct TopicState {
    groups: HashMap<String, mpsc::UnboundedSender<Message>>,
    backlog: Vec<Message>,
    delivered: usize,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    half: HashMap<MessageId, HalfMessage>,
    dead_letters: HashMap<String, Vec<Message>>,
    publish_failures: HashMap<String, u32>,
    fail_end_transaction: bool,
    closed: bool,
}

impl BrokerState {
    fn route(&mut self, message: Message) {
        let topic = self.topics.entry(message.topic.clone()).or_default();
        topic.groups.retain(|_, sender| !sender.is_closed());
        topic.delivered += 1;

        if topic.groups.is_empty() {
            topic.backlog.push(message);
            return;
        }
        for sender in topic.groups.values() {
            let _ = sender.send(message.clone());
        }
    }

    fn route_to_group(&mut self, message: Message, group: &str) {
        let sender = self
            .topics
            .get(&message.topic)
            .and_then(|topic| topic.groups.get(group))
            .filter(|sender| !sender.is_closed());

        match sender {
            Some(sender) => {
                let _ = sender.send(message);
            }
            None => {
                tracing::warn!(%group, topic = %message.topic, "group gone, dead-lettering redelivery");
                self.dead_letter(message, group);
            }
        }
    }

    fn dead_letter(&mut self, message: Message, group: &str) {
        metrics::counter!("broker_dead_letters_total").increment(1);
        self.dead_letters
            .entry(dead_letter_topic(group))
            .or_default()
            .push(message);
    }

    fn take_publish_failure(&mut self, topic: &str) -> bool {
        match self.publish_failures.get_mut(topic) {
            None => false,
            Some(remaining) => match *remaining {
                0 => false,
                u32::MAX => true,
                _ => {
                    *remaining -= 1;
                    true
                }
            },
        }
    }
}

/// In-memory broker for tests and single-process deployments.
///
/// Supports immediate and delayed delivery, half messages with periodic
/// check-back, per-group redelivery with backoff and dead-lettering.
/// Nothing survives a restart.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    timers: Arc<std::sync::Mutex<JoinSet<()>>>,
    closed_tx: Arc<watch::Sender<bool>>,
    config: BrokerConfig,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_config(BrokerConfig::default())
    }
}

impl InMemoryBroker {
    /// Creates a broker with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker with the given settings.
    pub fn with_config(config: BrokerConfig) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            timers: Arc::new(std::sync::Mutex::new(JoinSet::new())),
            closed_tx: Arc::new(closed_tx),
            config,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Makes every publish to `topic` fail while `fail` is set.
    pub async fn set_fail_on_publish(&self, topic: &str, fail: bool) {
        let mut state = self.state.lock().await;
        if fail {
            state.publish_failures.insert(topic.to_string(), u32::MAX);
        } else {
            state.publish_failures.remove(topic);
        }
    }

    /// Makes the next `count` publishes to `topic` fail.
    pub async fn fail_next_publishes(&self, topic: &str, count: u32) {
        self.state
            .lock()
            .await
            .publish_failures
            .insert(topic.to_string(), count);
    }

    /// Makes transaction outcomes get lost, as if the producer crashed
    /// before reporting them.
    pub async fn set_fail_on_end_transaction(&self, fail: bool) {
        self.state.lock().await.fail_end_transaction = fail;
    }

    /// Number of half messages still awaiting an outcome.
    pub async fn half_message_count(&self) -> usize {
        self.state.lock().await.half.len()
    }

    /// Number of messages released to `topic` (immediate, delayed or committed).
    pub async fn delivered_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, |t| t.delivered)
    }

    /// Number of dead-lettered messages across all groups.
    pub async fn dead_letter_count(&self) -> usize {
        self.state
            .lock()
            .await
            .dead_letters
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Dead-lettered messages of one consumer group.
    pub async fn dead_letters(&self, group: &str) -> Vec<Message> {
        self.state
            .lock()
            .await
            .dead_letters
            .get(&dead_letter_topic(group))
            .cloned()
            .unwrap_or_default()
    }

    fn schedule(&self, delay: Duration, deliver: impl FnOnce(&mut BrokerState) + Send + 'static) {
        let state = self.state.clone();
        let mut timers = self
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Reap finished timers so the set does not grow without bound.
        while timers.try_join_next().is_some() {}
        timers.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = state.lock().await;
            if !state.closed {
                deliver(&mut *state);
            }
        });
    }

    /// Runs one check-back round over unresolved half messages.
    ///
    /// Returns how many half messages were resolved.
    pub async fn check_pending(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(MessageId, Message, Arc<dyn TransactionChecker>)> = {
            let state = self.state.lock().await;
            state
                .half
                .iter()
                .filter(|(_, half)| now.duration_since(half.staged_at) >= self.config.check_immunity)
                .map(|(id, half)| (*id, half.message.clone(), half.checker.clone()))
                .collect()
        };

        let mut resolved = 0;
        for (id, message, checker) in due {
            let decision = checker.check(&message).await;
            tracing::info!(message_id = %id, %decision, "half message checked back");

            let mut state = self.state.lock().await;
            let Some(mut half) = state.half.remove(&id) else {
                // Resolved concurrently by the producer.
                continue;
            };
            match decision {
                LocalTransactionState::Commit => {
                    metrics::counter!("broker_half_messages_total", "outcome" => "commit")
                        .increment(1);
                    state.route(half.message);
                    resolved += 1;
                }
                LocalTransactionState::Rollback => {
                    metrics::counter!("broker_half_messages_total", "outcome" => "rollback")
                        .increment(1);
                    resolved += 1;
                }
                LocalTransactionState::Unknown => {
                    half.checks += 1;
                    if half.checks >= self.config.max_checks {
                        tracing::error!(
                            message_id = %id,
                            checks = half.checks,
                            "half message never resolved, discarding"
                        );
                        metrics::counter!("broker_half_messages_total", "outcome" => "expired")
                            .increment(1);
                    } else {
                        state.half.insert(id, half);
                    }
                }
            }
        }
        resolved
    }

    /// Spawns the periodic check-back loop. It exits on shutdown.
    pub fn spawn_check_back(&self) -> JoinHandle<()> {
        let broker = self.clone();
        let mut closed = self.closed_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broker.config.check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        broker.check_pending().await;
                    }
                    _ = closed.changed() => break,
                }
            }
            tracing::debug!("check-back loop stopped");
        })
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: Message) -> Result<SendResult> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::Shutdown);
        }
        if state.take_publish_failure(&message.topic) {
            return Err(BrokerError::Unavailable(format!(
                "publish to {} rejected",
                message.topic
            )));
        }

        let message_id = message.id;
        match message.delay {
            Some(level) => {
                drop(state);
                tracing::debug!(%message_id, topic = %message.topic, delay = %level, "delayed message accepted");
                self.schedule(level.duration(), move |state| state.route(message));
            }
            None => state.route(message),
        }
        Ok(SendResult { message_id })
    }

    async fn send_half(
        &self,
        message: Message,
        checker: Arc<dyn TransactionChecker>,
    ) -> Result<SendResult> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::Shutdown);
        }
        if state.take_publish_failure(&message.topic) {
            return Err(BrokerError::Unavailable(format!(
                "half message to {} rejected",
                message.topic
            )));
        }

        let message_id = message.id;
        state.half.insert(
            message_id,
            HalfMessage {
                message,
                checker,
                staged_at: Instant::now(),
                checks: 0,
            },
        );
        Ok(SendResult { message_id })
    }

    async fn end_transaction(
        &self,
        message_id: MessageId,
        outcome: LocalTransactionState,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_end_transaction {
            return Err(BrokerError::Unavailable(
                "transaction outcome lost".to_string(),
            ));
        }
        if outcome == LocalTransactionState::Unknown {
            return if state.half.contains_key(&message_id) {
                Ok(())
            } else {
                Err(BrokerError::UnknownTransaction(message_id))
            };
        }

        let half = state
            .half
            .remove(&message_id)
            .ok_or(BrokerError::UnknownTransaction(message_id))?;
        metrics::counter!("broker_half_messages_total", "outcome" => outcome.as_str())
            .increment(1);
        if outcome == LocalTransactionState::Commit {
            state.route(half.message);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::Shutdown);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        for message in topic_state.backlog.drain(..) {
            let _ = sender.send(message);
        }
        topic_state.groups.insert(group.to_string(), sender);

        Ok(Subscription::new(topic, group, receiver))
    }

    async fn reconsume_later(&self, mut message: Message, group: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::Shutdown);
        }

        message.reconsume_times += 1;
        if message.reconsume_times > self.config.max_reconsume_times {
            tracing::error!(
                message_id = %message.id,
                %group,
                reconsume_times = message.reconsume_times,
                "redelivery budget exhausted, dead-lettering"
            );
            state.dead_letter(message, group);
            return Ok(());
        }
        drop(state);

        let backoff = DelayLevel::new(RETRY_BASE_LEVEL)
            .unwrap_or(DelayLevel::MIN)
            .saturating_add(message.reconsume_times - 1);
        let group = group.to_string();
        self.schedule(backoff.duration(), move |state| {
            state.route_to_group(message, &group)
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let pending_half = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            for topic in state.topics.values_mut() {
                topic.groups.clear();
            }
            state.half.len()
        };
        self.closed_tx.send_replace(true);

        let pending_timers = {
            let mut timers = self
                .timers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let pending = timers.len();
            timers.abort_all();
            pending
        };

        if pending_half > 0 || pending_timers > 0 {
            tracing::warn!(
                pending_half,
                pending_timers,
                "broker shut down with undelivered messages"
            );
        }
        tracing::info!("broker shut down");
        Ok(())
    }
}
