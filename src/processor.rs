//! The consumer loop: one long-lived processor per process instance.
//!
//! Two wake sources feed one coalescing signal: store change notifications
//! from the bus (and the admin requeue), and a fallback poll interval that
//! guarantees progress when notifications are dropped. A productive pass
//! re-arms the signal itself, so a backlogged lane drains pass after pass
//! instead of one message per poll interval. Each pass selects at most one
//! message per lane and fans the lanes out concurrently, so lane order is
//! strict while unrelated lanes overlap.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use sqlx::{Acquire, SqlitePool};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::message::Message;
use crate::registry::RecipientRegistry;

pub struct MessageProcessor {
    db: SqlitePool,
    registry: Arc<RecipientRegistry>,
    config: Config,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl MessageProcessor {
    pub fn new(
        db: SqlitePool,
        registry: Arc<RecipientRegistry>,
        config: &Config,
        wake: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            registry,
            config: config.clone(),
            wake,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!("message processor started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("message processor stopping");
                    break;
                }
                // A burst of notifications collapses into a single permit,
                // so one pass drains them all.
                _ = tokio::time::timeout(self.config.fallback_poll_interval(), self.wake.notified()) => {}
            }

            if let Err(e) = self.run_pass().await {
                tracing::error!(error = %e, "processing pass failed");
            }
        }
    }

    /// One pass: select the due head of every lane, process the selection
    /// concurrently, join. Public so tests can step the state machine
    /// deterministically.
    pub async fn run_pass(&self) -> eyre::Result<()> {
        let now = Utc::now();

        let due = {
            let mut conn = self.db.acquire().await?;
            Message::due_heads(conn.acquire().await?, now).await?
        };

        if due.is_empty() {
            return Ok(());
        }

        tracing::debug!(lanes = due.len(), "processing due messages");

        futures_util::future::join_all(due.into_iter().map(|msg| self.process(msg))).await;

        // A finished head may expose the next message in its lane; schedule
        // another pass instead of waiting out the fallback timer.
        self.wake.notify_one();

        Ok(())
    }

    async fn process(&self, msg: Message) {
        if let Err(e) = self.advance(&msg).await {
            // Store-level failure; the message stays where it was and the
            // next pass picks it up again.
            tracing::error!(id = msg.id, queue = %msg.queue, error = %e, "failed to advance message");
        }
    }

    async fn advance(&self, msg: &Message) -> eyre::Result<()> {
        let mut conn = self.db.acquire().await?;

        // Committed before any recipient runs: a crash mid-delivery leaves an
        // observable processing row instead of silently losing the message.
        Message::mark_processing(conn.acquire().await?, msg.id).await?;

        // An unknown tag cannot resolve on retry; dead-letter without
        // consuming an attempt.
        let Some(decoded) = self.registry.decode(&msg.payload_type, &msg.payload) else {
            tracing::warn!(id = msg.id, payload_type = %msg.payload_type, "unknown payload type");
            Message::dead_letter(
                conn.acquire().await?,
                msg.id,
                msg.attempt_count,
                format!("unknown payload type: {}", msg.payload_type),
            )
            .await?;
            return Ok(());
        };

        let payload = match decoded {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(id = msg.id, payload_type = %msg.payload_type, error = %e, "undecodable payload");
                Message::dead_letter(
                    conn.acquire().await?,
                    msg.id,
                    msg.attempt_count,
                    format!("payload deserialization failed: {e}"),
                )
                .await?;
                return Ok(());
            }
        };

        let recipients = self.registry.recipients(&msg.payload_type);

        if recipients.is_empty() {
            // Nobody cared; that is not a delivery failure.
            tracing::debug!(id = msg.id, payload_type = %msg.payload_type, "no recipients registered");
            Message::complete(conn.acquire().await?, msg.id, msg.attempt_count + 1).await?;
            return Ok(());
        }

        let mut outcome = Ok(());

        for registration in recipients {
            let token = self.shutdown.child_token();
            if let Err(e) = registration.invoke(Arc::clone(&payload), token).await {
                outcome = Err(e.wrap_err(format!("recipient {} failed", registration.recipient())));
                break;
            }
        }

        match outcome {
            Ok(()) => {
                Message::complete(conn.acquire().await?, msg.id, msg.attempt_count + 1).await?;
                tracing::debug!(id = msg.id, queue = %msg.queue, "message completed");
            }
            Err(e) => {
                if self.shutdown.is_cancelled() {
                    // Shutdown mid-delivery; the error is an artifact of
                    // cancellation, not of the message.
                    tracing::debug!(id = msg.id, "delivery interrupted by shutdown");
                    return Ok(());
                }

                let attempts = msg.attempt_count + 1;

                if attempts >= msg.max_attempts {
                    Message::dead_letter(conn.acquire().await?, msg.id, attempts, e.to_string())
                        .await?;
                    tracing::warn!(
                        id = msg.id,
                        queue = %msg.queue,
                        attempts,
                        error = %e,
                        "message dead-lettered"
                    );
                } else {
                    let delay = self.config.backoff_delay(attempts as u32);
                    let next_attempt_at = Utc::now() + TimeDelta::from_std(delay)?;
                    Message::fail(
                        conn.acquire().await?,
                        msg.id,
                        attempts,
                        e.to_string(),
                        next_attempt_at,
                    )
                    .await?;
                    tracing::warn!(
                        id = msg.id,
                        queue = %msg.queue,
                        attempts,
                        retry_at = %next_attempt_at,
                        error = %e,
                        "delivery failed, will retry"
                    );
                }
            }
        }

        Ok(())
    }
}
