//! Producer side of the queue: serialize a payload, write one durable row.
//!
//! Delivery is fully decoupled; no recipient runs on the broadcasting task.
//! The only synchronous effect of a broadcast is the store insert, and a
//! store-write failure propagates to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Acquire, SqlitePool};
use tokio::sync::Notify;

use crate::message::Message;

/// A message body that can travel through the queue.
///
/// The tag must be stable across modules and releases: it is persisted with
/// every row and is the key recipients are registered under.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    /// Lane used when `broadcast` is given no explicit queue.
    fn queue_name(&self) -> String {
        Self::TYPE_NAME.to_owned()
    }
}

#[derive(Clone)]
pub struct MessageBus {
    db: SqlitePool,
    max_attempts: u32,
    wake: Arc<Notify>,
}

impl MessageBus {
    pub fn new(db: SqlitePool, max_attempts: u32, wake: Arc<Notify>) -> Self {
        Self {
            db,
            max_attempts,
            wake,
        }
    }

    /// Enqueue a payload for immediate delivery. Returns the message id.
    pub async fn broadcast<P: Payload>(
        &self,
        payload: &P,
        queue: Option<&str>,
    ) -> eyre::Result<i64> {
        self.publish(payload, queue, None).await
    }

    /// Enqueue a payload that becomes eligible only after `delay`.
    pub async fn delayed_broadcast<P: Payload>(
        &self,
        payload: &P,
        delay: Duration,
    ) -> eyre::Result<i64> {
        self.publish(payload, None, Some(delay)).await
    }

    async fn publish<P: Payload>(
        &self,
        payload: &P,
        queue: Option<&str>,
        delay: Option<Duration>,
    ) -> eyre::Result<i64> {
        let queue = match queue {
            Some(q) => q.to_owned(),
            None => payload.queue_name(),
        };

        let body = serde_json::to_string(payload)?;

        let next_attempt_at = match delay {
            Some(d) => Some(Utc::now() + TimeDelta::from_std(d)?),
            None => None,
        };

        let mut tx = self.db.begin().await?;

        let id = Message::insert(
            tx.acquire().await?,
            &queue,
            P::TYPE_NAME,
            &body,
            next_attempt_at,
            self.max_attempts,
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(id, queue = %queue, payload_type = P::TYPE_NAME, "message enqueued");

        // Store change notification for the processor.
        self.wake.notify_one();

        Ok(id)
    }
}
