use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::Payload;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SyncActionType {
    Insert,
    Update,
    Delete,
}

/// One replicated write, immutable once enqueued.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncAction {
    pub action_type: SyncActionType,
    /// Logical name of the target entity set on the owning module.
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Field names that changed. When present the owner performs a partial
    /// merge touching only these fields; when absent, a full replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncActionRequest {
    pub requesting_module: String,
    pub actions: Vec<SyncAction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncActionResult {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncApplyResponse {
    pub results: Vec<SyncActionResult>,
}

/// Queued envelope: a sync request plus the module that owns the data,
/// which the network recipient resolves to a destination address.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncActionDeploymentMessage {
    pub owner_module: String,
    pub request: SyncActionRequest,
}

impl Payload for SyncActionDeploymentMessage {
    const TYPE_NAME: &'static str = "sync.action-deployment";
}
