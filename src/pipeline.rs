//! The save pipeline seam and its SQLite-backed default.
//!
//! Replicated writes commit through this pipeline rather than a raw store
//! write so that domain lifecycle hooks run for them exactly as they do for
//! locally originated writes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

/// Result of a save commit. Returned as a plain variant so callers thread
/// the outcome explicitly instead of unwinding through it.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        id: String,
    },
    /// The pipeline paused for an interactive decision. There is no
    /// interactive caller on the replication path, so sync consumers treat
    /// this as a rejection.
    NeedsConfirmation {
        step: String,
        options: Vec<String>,
    },
    Failed {
        reason: String,
    },
}

/// Decision of a lifecycle hook that runs before a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Proceed,
    Confirm { step: String, options: Vec<String> },
    Reject { reason: String },
}

#[async_trait::async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn before_save(&self, _collection: &str, _document: &Value) -> eyre::Result<HookDecision> {
        Ok(HookDecision::Proceed)
    }

    async fn before_delete(&self, _collection: &str, _id: &str) -> eyre::Result<HookDecision> {
        Ok(HookDecision::Proceed)
    }
}

#[async_trait::async_trait]
pub trait SavePipeline: Send + Sync {
    async fn load(&self, collection: &str, id: &str) -> eyre::Result<Option<Value>>;

    /// Commit a document. `id` of `None` means the store assigns one.
    async fn save(
        &self,
        collection: &str,
        id: Option<&str>,
        document: Value,
    ) -> eyre::Result<SaveOutcome>;

    async fn delete(&self, collection: &str, id: &str) -> eyre::Result<()>;
}

/// Document store over a `documents` table, with hooks run before every
/// commit.
pub struct SqliteDocumentPipeline {
    db: SqlitePool,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl SqliteDocumentPipeline {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

#[async_trait::async_trait]
impl SavePipeline for SqliteDocumentPipeline {
    async fn load(&self, collection: &str, id: &str) -> eyre::Result<Option<Value>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        collection: &str,
        id: Option<&str>,
        document: Value,
    ) -> eyre::Result<SaveOutcome> {
        for hook in &self.hooks {
            match hook.before_save(collection, &document).await? {
                HookDecision::Proceed => {}
                HookDecision::Confirm { step, options } => {
                    return Ok(SaveOutcome::NeedsConfirmation { step, options })
                }
                HookDecision::Reject { reason } => return Ok(SaveOutcome::Failed { reason }),
            }
        }

        let body = serde_json::to_string(&document)?;

        let id = match id {
            Some(id) => {
                sqlx::query(
                    "
                    INSERT INTO documents (collection, id, body, updated_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (collection, id)
                    DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
                    ",
                )
                .bind(collection)
                .bind(id)
                .bind(&body)
                .bind(Utc::now())
                .execute(&self.db)
                .await?;

                id.to_owned()
            }
            // Opaque id assigned by the store on insert.
            None => {
                sqlx::query_scalar(
                    "
                    INSERT INTO documents (collection, id, body, updated_at)
                    VALUES ($1, lower(hex(randomblob(16))), $2, $3)
                    RETURNING id
                    ",
                )
                .bind(collection)
                .bind(&body)
                .bind(Utc::now())
                .fetch_one(&self.db)
                .await?
            }
        };

        Ok(SaveOutcome::Saved { id })
    }

    async fn delete(&self, collection: &str, id: &str) -> eyre::Result<()> {
        for hook in &self.hooks {
            match hook.before_delete(collection, id).await? {
                HookDecision::Proceed => {}
                HookDecision::Confirm { step, .. } => {
                    eyre::bail!("delete requires confirmation at step {step}")
                }
                HookDecision::Reject { reason } => eyre::bail!("delete rejected: {reason}"),
            }
        }

        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
