use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One of the discrete delivery delays the broker supports.
///
/// Levels are 1-based, shortest first:
/// `1s 5s 10s 30s 1m 2m 3m 4m 5m 6m 7m 8m 9m 10m 20m 30m 1h 2h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DelayLevel(u8);

const LADDER_SECS: [u64; 18] = [
    1, 5, 10, 30, 60, 120, 180, 240, 300, 360, 420, 480, 540, 600, 1200, 1800, 3600, 7200,
];

impl DelayLevel {
    /// The shortest delay tier (1s).
    pub const MIN: DelayLevel = DelayLevel(1);

    /// The longest delay tier (2h).
    pub const MAX: DelayLevel = DelayLevel(LADDER_SECS.len() as u8);

    /// Returns the tier with the given 1-based level, if it exists.
    pub fn new(level: u8) -> Option<Self> {
        (1..=Self::MAX.0).contains(&level).then_some(Self(level))
    }

    /// Returns the shortest tier that is at least `delay` long, capped at the longest tier.
    pub fn at_least(delay: Duration) -> Self {
        LADDER_SECS
            .iter()
            .position(|&secs| Duration::from_secs(secs) >= delay)
            .map(|idx| Self(idx as u8 + 1))
            .unwrap_or(Self::MAX)
    }

    /// Returns the 1-based level.
    pub fn level(&self) -> u8 {
        self.0
    }

    /// Returns the delivery delay of this tier.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(LADDER_SECS[usize::from(self.0 - 1)])
    }

    /// Returns the next longer tier, saturating at the longest.
    pub fn saturating_add(&self, steps: u32) -> Self {
        let level = u32::from(self.0).saturating_add(steps).min(u32::from(Self::MAX.0));
        Self(level as u8)
    }
}

impl TryFrom<u8> for DelayLevel {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        DelayLevel::new(level).ok_or_else(|| format!("delay level {level} is not in 1..=18"))
    }
}

impl From<DelayLevel> for u8 {
    fn from(level: DelayLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for DelayLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.duration().as_secs();
        match secs {
            s if s >= 3600 => write!(f, "{}h", s / 3600),
            s if s >= 60 => write!(f, "{}m", s / 60),
            s => write!(f, "{s}s"),
        }
    }
}

/// A message as seen by producers and consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned on creation.
    pub id: MessageId,

    /// Destination topic.
    pub topic: String,

    /// Opaque body; JSON for every message this platform sends.
    pub body: Vec<u8>,

    /// Delivery delay; `None` delivers immediately.
    pub delay: Option<DelayLevel>,

    /// How many times consumers asked for this message to be redelivered.
    pub reconsume_times: u32,

    /// When the producer created the message.
    pub born_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message with a raw body.
    pub fn new(topic: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            body,
            delay: None,
            reconsume_times: 0,
            born_at: Utc::now(),
        }
    }

    /// Creates a message whose body is the JSON encoding of `payload`.
    pub fn json<T: Serialize>(topic: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(topic, serde_json::to_vec(payload)?))
    }

    /// Defers delivery by the given tier.
    pub fn with_delay(mut self, level: DelayLevel) -> Self {
        self.delay = Some(level);
        self
    }

    /// Decodes the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
