use std::sync::Arc;

use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
    SqlitePoolOptions,
};
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::catalog::{EntityCatalog, EntityDef};
use crate::config::Config;
use crate::pipeline::{LifecycleHook, SavePipeline, SqliteDocumentPipeline};
use crate::processor::MessageProcessor;
use crate::registry::RecipientRegistry;
use crate::sync::handler::SyncActionHandler;
use crate::sync::interceptor::{ReplicaMetadata, SyncInterceptor};
use crate::sync::recipient::SyncDeploymentRecipient;
use crate::sync::types::SyncActionDeploymentMessage;

/// Startup wiring that callers may customize before the processor starts:
/// the entity catalog of the owning side, replica declarations of the
/// non-owning side, recipient registrations, lifecycle hooks, and an
/// optional replacement save pipeline.
pub struct ServiceParts {
    pub entities: Vec<EntityDef>,
    pub replicas: Vec<(String, ReplicaMetadata)>,
    pub registry: RecipientRegistry,
    /// Hooks attached to the default document pipeline; ignored when
    /// `pipeline` is supplied.
    pub hooks: Vec<Arc<dyn LifecycleHook>>,
    pub pipeline: Option<Arc<dyn SavePipeline>>,
}

impl Default for ServiceParts {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            replicas: Vec::new(),
            registry: RecipientRegistry::new(),
            hooks: Vec::new(),
            pipeline: None,
        }
    }
}

pub struct Service {
    db: SqlitePool,
    config: Config,
    bus: MessageBus,
    registry: Arc<RecipientRegistry>,
    handler: SyncActionHandler,
    interceptor: SyncInterceptor,
    wake: Arc<Notify>,
}

impl Service {
    pub async fn connect() -> eyre::Result<Self> {
        Self::connect_with(Config::default()).await
    }

    pub async fn connect_with(config: Config) -> eyre::Result<Self> {
        Self::connect_with_parts(config, ServiceParts::default()).await
    }

    pub async fn connect_with_parts(config: Config, parts: ServiceParts) -> eyre::Result<Self> {
        config.validate()?;

        let opts = if let Some(path) = &config.db_path {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        } else {
            // Shared cache so every pooled connection sees the same
            // in-memory database.
            SqliteConnectOptions::new().in_memory(true).shared_cache(true)
        }
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .locking_mode(SqliteLockingMode::Normal)
        .optimize_on_close(true, None)
        .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let wake = Arc::new(Notify::new());
        let bus = MessageBus::new(pool.clone(), config.max_attempts, Arc::clone(&wake));

        let mut registry = parts.registry;
        let endpoints = Arc::new(config.module_endpoints()?);
        let outbound = SyncDeploymentRecipient::new(endpoints)?;
        registry.register::<SyncActionDeploymentMessage, _, _>(move || outbound.clone());

        let pipeline: Arc<dyn SavePipeline> = match parts.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let mut default = SqliteDocumentPipeline::new(pool.clone());
                for hook in parts.hooks {
                    default = default.with_hook(hook);
                }
                Arc::new(default)
            }
        };

        let catalog = Arc::new(EntityCatalog::new(parts.entities));
        let handler = SyncActionHandler::new(catalog, pipeline);
        let interceptor =
            SyncInterceptor::new(bus.clone(), config.module_name.clone(), parts.replicas);

        Ok(Self {
            db: pool,
            config,
            bus,
            registry: Arc::new(registry),
            handler,
            interceptor,
            wake,
        })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn sync_handler(&self) -> &SyncActionHandler {
        &self.handler
    }

    pub fn interceptor(&self) -> &SyncInterceptor {
        &self.interceptor
    }

    /// Nudge the processor outside of a bus publish, e.g. after an admin
    /// requeue.
    pub fn wake_processor(&self) {
        self.wake.notify_one();
    }

    pub fn processor(&self, shutdown: CancellationToken) -> MessageProcessor {
        MessageProcessor::new(
            self.db.clone(),
            Arc::clone(&self.registry),
            &self.config,
            Arc::clone(&self.wake),
            shutdown,
        )
    }
}
