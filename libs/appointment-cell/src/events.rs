// libs/appointment-cell/src/events.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use futures::future::join_all;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{DeadlineClass, ParticipantRole};

pub const DEFAULT_EVENT_CHANNEL: &str = "scheduling.events";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SlotHeld {
        slot_id: Uuid,
        psychologist_id: Uuid,
        session_id: Uuid,
    },
    SlotReleased {
        slot_id: Uuid,
        psychologist_id: Uuid,
    },
    SessionBooked {
        session_id: Uuid,
        patient_id: Uuid,
        psychologist_id: Uuid,
        scheduled_at: Option<DateTime<Utc>>,
    },
    CancellationRequested {
        request_id: Uuid,
        session_id: Uuid,
        protocol: String,
        deadline: DeadlineClass,
    },
    CancellationApproved {
        request_id: Uuid,
        session_id: Uuid,
    },
    CancellationRejected {
        request_id: Uuid,
        session_id: Uuid,
    },
    SessionCancelled {
        session_id: Uuid,
        patient_id: Uuid,
        psychologist_id: Uuid,
    },
    TokensIssued {
        session_id: Uuid,
        role: ParticipantRole,
        first_issue: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError>;
}

/// In-process fan-out. Having no subscribers is not a failure.
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        if self.sender.send(envelope.clone()).is_err() {
            debug!("No in-process subscribers for event {}", envelope.id);
        }
        Ok(())
    }
}

/// Publishes every event as JSON on a Redis pub/sub channel.
pub struct RedisEventPublisher {
    pool: Pool,
    channel: String,
}

impl RedisEventPublisher {
    pub fn new(redis_url: &str, channel: &str) -> Result<Self, PublishError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| PublishError::Pool(format!("Pool creation error: {}", e)))?;

        info!("Redis event publisher configured on channel {}", channel);
        Ok(Self {
            pool,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PublishError::Pool(format!("Connection error: {}", e)))?;
        let _: i64 = conn.publish(&self.channel, payload).await?;
        Ok(())
    }
}

/// Delivers domain events to every registered publisher. Delivery is best
/// effort: a failing publisher is logged and never fails the caller.
pub struct EventBus {
    publishers: Vec<Arc<dyn EventPublisher>>,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            publishers: Vec::new(),
            clock,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub async fn emit(&self, event: DomainEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            occurred_at: self.clock.now(),
            event,
        };

        let deliveries = self.publishers.iter().map(|publisher| {
            let envelope = &envelope;
            async move {
                if let Err(e) = publisher.publish(envelope).await {
                    warn!("Publisher {} dropped event {}: {}", publisher.name(), envelope.id, e);
                }
            }
        });
        join_all(deliveries).await;
    }
}
