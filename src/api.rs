//! Operator surface: dead-letter inspection, requeueing, queue statistics.

use actix_web::{get, post, web, Responder, Scope};
use sqlx::Acquire;

use crate::error::Error;
use crate::message::{Message, MessageStatus, QueueStatistics};
use crate::service::Service;

#[get("/messages/dead")]
async fn list_dead_lettered(
    service: web::Data<Service>,
) -> Result<web::Json<Vec<Message>>, Error> {
    let mut conn = service.db().acquire().await?;

    let messages = Message::list_dead_lettered(conn.acquire().await?).await?;

    Ok(web::Json(messages))
}

/// Reset a dead-lettered or crash-stuck processing row back to pending.
#[post("/messages/{id}/requeue")]
async fn requeue_message(
    service: web::Data<Service>,
    path: web::Path<i64>,
) -> Result<impl Responder, Error> {
    let id = path.into_inner();

    let mut conn = service.db().acquire().await?;

    let Some(message) = Message::get(conn.acquire().await?, id).await? else {
        return Err(Error::not_found(format!("message {id}")));
    };

    if !matches!(
        message.status,
        MessageStatus::DeadLettered | MessageStatus::Processing
    ) {
        return Err(Error::invalid_parameter(format!(
            "message {id} is {}; only dead_lettered or processing rows can be requeued",
            message.status
        )));
    }

    Message::requeue(conn.acquire().await?, id).await?;

    tracing::info!(id, queue = %message.queue, "message requeued");

    service.wake_processor();

    Ok("OK")
}

#[get("/queues")]
async fn queue_statistics(
    service: web::Data<Service>,
) -> Result<web::Json<Vec<QueueStatistics>>, Error> {
    let mut conn = service.db().acquire().await?;

    let stats = Message::statistics(conn.acquire().await?).await?;

    Ok(web::Json(stats))
}

pub fn service() -> Scope {
    web::scope("/admin")
        .service(list_dead_lettered)
        .service(requeue_message)
        .service(queue_statistics)
}
