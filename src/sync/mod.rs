//! Transport boundary for inbound replication: the apply endpoint receives
//! a batch of sync actions and applies each one independently.

use actix_web::{post, web, HttpResponse, Scope};

use crate::error::Error;
use crate::service::Service;

pub mod handler;
pub mod interceptor;
pub mod recipient;
pub mod types;

use handler::SyncActionHandler;
use types::{SyncAction, SyncActionRequest, SyncActionResult, SyncActionType, SyncApplyResponse};

#[post("/apply")]
async fn apply(
    service: web::Data<Service>,
    request: web::Json<SyncActionRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();

    tracing::info!(
        module = %request.requesting_module,
        actions = request.actions.len(),
        "applying sync request"
    );

    let mut results = Vec::with_capacity(request.actions.len());

    for action in &request.actions {
        results.push(apply_one(service.sync_handler(), action).await);
    }

    let response = SyncApplyResponse { results };

    if response.results.iter().all(|r| r.success) {
        Ok(HttpResponse::Ok().json(response))
    } else {
        Ok(HttpResponse::MultiStatus().json(response))
    }
}

/// Apply a single action; failures are captured per action and never abort
/// the remaining batch.
async fn apply_one(handler: &SyncActionHandler, action: &SyncAction) -> SyncActionResult {
    let outcome = match action.action_type {
        SyncActionType::Insert | SyncActionType::Update => match &action.data {
            Some(data) => handler
                .handle_save(
                    &action.collection,
                    action.document_id.as_deref(),
                    data,
                    action.properties.as_deref(),
                )
                .await
                .map(Some),
            None => Err(Error::missing_parameter(format!(
                "data for {} on {}",
                action.action_type, action.collection
            ))),
        },
        SyncActionType::Delete => match &action.document_id {
            Some(id) => handler
                .handle_delete(&action.collection, id)
                .await
                .map(|()| None),
            None => Err(Error::missing_parameter(format!(
                "documentId for delete on {}",
                action.collection
            ))),
        },
    };

    match outcome {
        Ok(id) => SyncActionResult {
            collection: action.collection.clone(),
            document_id: id.or_else(|| action.document_id.clone()),
            success: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!(
                collection = %action.collection,
                document_id = ?action.document_id,
                error = %e,
                "sync action failed"
            );

            SyncActionResult {
                collection: action.collection.clone(),
                document_id: action.document_id.clone(),
                success: false,
                error: Some(e.to_string()),
            }
        }
    }
}

pub fn service() -> Scope {
    web::scope("/sync").service(apply)
}
