//! Message rows and their lifecycle states.
//!
//! A message is one durable unit of work: a serialized payload addressed to a
//! logical queue (lane). Messages flow `Pending -> Processing -> Completed`
//! on success; failures move back to `Failed` with a retry timestamp until
//! the attempt ceiling is reached, after which they are dead-lettered.
//!
//! `Completed` and `DeadLettered` are terminal. A message is eligible for
//! processing iff its status is `Pending` or `Failed` and `next_attempt_at`
//! is unset or in the past.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, SqliteConnection};
use tokio_stream::StreamExt;

/// Current status of a message.
///
/// `Processing` is transient: it is committed before any recipient runs, so
/// a crash mid-delivery is observable as a stuck `Processing` row rather
/// than silent loss. Such rows are not requeued automatically; operators
/// reset them through the admin surface.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    sqlx::Type,
    strum::Display,
    strum::EnumString,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for its first delivery attempt.
    Pending,
    /// A delivery attempt is in flight.
    Processing,
    /// Every recipient handled the payload.
    Completed,
    /// The last attempt failed; eligible again once `next_attempt_at` passes.
    Failed,
    /// Retries exhausted or the payload is unrecoverable.
    DeadLettered,
}

#[derive(Serialize, Deserialize, FromRow, Debug, Clone)]
pub struct Message {
    pub id: i64,
    /// Logical lane; messages in one lane are processed strictly oldest-first.
    pub queue: String,
    /// Stable tag resolving the payload's type in the recipient registry.
    pub payload_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    /// Unset means eligible immediately; set for delayed broadcasts and
    /// retry backoff.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub status: MessageStatus,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Message {
    pub async fn insert(
        db: &mut SqliteConnection,
        queue: impl AsRef<str>,
        payload_type: impl AsRef<str>,
        payload: impl AsRef<str>,
        next_attempt_at: Option<DateTime<Utc>>,
        max_attempts: u32,
    ) -> eyre::Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "
            INSERT INTO messages (queue, payload_type, payload, created_at, next_attempt_at, max_attempts, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(queue.as_ref())
        .bind(payload_type.as_ref())
        .bind(payload.as_ref())
        .bind(Utc::now())
        .bind(next_attempt_at)
        .bind(max_attempts as i64)
        .bind(MessageStatus::Pending)
        .fetch_one(db)
        .await?;

        Ok(id)
    }

    pub async fn get(db: &mut SqliteConnection, id: i64) -> eyre::Result<Option<Message>> {
        Ok(sqlx::query_as("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?)
    }

    /// Head-of-lane selection: for every queue the single oldest
    /// non-terminal message, filtered down to those due now.
    ///
    /// A lane whose head is backing off (or stuck in `Processing`) yields
    /// nothing, so a younger lane-mate can never overtake it.
    pub async fn due_heads(
        db: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> eyre::Result<Vec<Message>> {
        let mut stream = sqlx::query_as(
            "
            SELECT m.* FROM messages m
            JOIN (
                SELECT queue, MIN(id) AS head_id
                FROM messages
                WHERE status IN ('pending', 'processing', 'failed')
                GROUP BY queue
            ) heads ON m.id = heads.head_id
            WHERE m.status IN ('pending', 'failed')
              AND (m.next_attempt_at IS NULL OR m.next_attempt_at <= $1)
            ORDER BY m.created_at, m.id
            ",
        )
        .bind(now)
        .fetch(db);

        let mut messages = Vec::new();

        while let Some(res) = stream.next().await.transpose()? {
            messages.push(res);
        }

        Ok(messages)
    }

    pub async fn mark_processing(db: &mut SqliteConnection, id: i64) -> eyre::Result<()> {
        sqlx::query("UPDATE messages SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(MessageStatus::Processing)
            .execute(db)
            .await?;

        Ok(())
    }

    /// Terminal success. `attempt_count` includes the attempt that just
    /// succeeded.
    pub async fn complete(
        db: &mut SqliteConnection,
        id: i64,
        attempt_count: i64,
    ) -> eyre::Result<()> {
        sqlx::query(
            "UPDATE messages SET status = $2, attempt_count = $3, completed_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(MessageStatus::Completed)
        .bind(attempt_count)
        .bind(Utc::now())
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn fail(
        db: &mut SqliteConnection,
        id: i64,
        attempt_count: i64,
        error: impl AsRef<str>,
        next_attempt_at: DateTime<Utc>,
    ) -> eyre::Result<()> {
        sqlx::query(
            "
            UPDATE messages
            SET status = $2, attempt_count = $3, last_error = $4, next_attempt_at = $5
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(MessageStatus::Failed)
        .bind(attempt_count)
        .bind(error.as_ref())
        .bind(next_attempt_at)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn dead_letter(
        db: &mut SqliteConnection,
        id: i64,
        attempt_count: i64,
        error: impl AsRef<str>,
    ) -> eyre::Result<()> {
        sqlx::query(
            "
            UPDATE messages
            SET status = $2, attempt_count = $3, last_error = $4, next_attempt_at = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(MessageStatus::DeadLettered)
        .bind(attempt_count)
        .bind(error.as_ref())
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn list_dead_lettered(db: &mut SqliteConnection) -> eyre::Result<Vec<Message>> {
        let mut stream =
            sqlx::query_as("SELECT * FROM messages WHERE status = $1 ORDER BY created_at, id")
                .bind(MessageStatus::DeadLettered)
                .fetch(db);

        let mut messages = Vec::new();

        while let Some(res) = stream.next().await.transpose()? {
            messages.push(res);
        }

        Ok(messages)
    }

    /// Put a dead-lettered or stuck-processing message back in line. The
    /// attempt history stays on the row; only status and the retry gate are
    /// reset.
    pub async fn requeue(db: &mut SqliteConnection, id: i64) -> eyre::Result<bool> {
        let result = sqlx::query(
            "
            UPDATE messages
            SET status = $2, next_attempt_at = NULL
            WHERE id = $1 AND status IN ('dead_lettered', 'processing')
            ",
        )
        .bind(id)
        .bind(MessageStatus::Pending)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn statistics(db: &mut SqliteConnection) -> eyre::Result<Vec<QueueStatistics>> {
        let mut stream = sqlx::query_as(
            "
            SELECT
                queue,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) AS processing,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'dead_lettered' THEN 1 ELSE 0 END) AS dead_lettered,
                MIN(CASE WHEN status = 'pending' THEN created_at END) AS oldest_pending_at
            FROM messages
            GROUP BY queue
            ORDER BY queue
            ",
        )
        .fetch(db);

        let mut stats = Vec::new();

        while let Some(res) = stream.next().await.transpose()? {
            stats.push(res);
        }

        Ok(stats)
    }
}

#[derive(Serialize, Deserialize, FromRow, Debug)]
pub struct QueueStatistics {
    pub queue: String,
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed: i64,
    pub dead_lettered: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}
