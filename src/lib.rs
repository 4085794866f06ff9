use actix_web::{
    middleware::{NormalizePath, TrailingSlash},
    web::{Data, JsonConfig},
    App, HttpServer,
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

use config::Config;
use service::Service;

pub mod api;
pub mod bus;
pub mod catalog;
pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod service;
pub mod sync;

/// Run the full application: logging, config, store, processor, HTTP server.
pub async fn run() -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RELAYMQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RELAYMQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;

    let service = Service::connect_with(config).await?;

    serve(service).await
}

/// Serve a wired service: spawns the processor loop and blocks on the HTTP
/// server until it exits, then shuts the processor down.
pub async fn serve(service: Service) -> eyre::Result<()> {
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(service.processor(shutdown.clone()).run());

    let listen_addr = service.config().listen_addr.clone();
    let data = Data::new(service);

    HttpServer::new(move || {
        let json_cfg = JsonConfig::default().content_type_required(false);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .service(sync::service())
            .service(api::service())
            .app_data(data.clone())
            .app_data(json_cfg)
    })
    .bind(listen_addr.as_str())?
    .run()
    .await?;

    shutdown.cancel();
    worker.await?;

    Ok(())
}
