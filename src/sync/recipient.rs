//! Network recipient: delivers a queued sync request to the owning module's
//! apply endpoint. Any failure here is a transient handler error, so the
//! message inherits the processor's retry, backoff and dead-letter rules.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::registry::Recipient;
use crate::sync::types::SyncActionDeploymentMessage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SyncDeploymentRecipient {
    client: reqwest::Client,
    endpoints: Arc<HashMap<String, Url>>,
}

impl SyncDeploymentRecipient {
    pub fn new(endpoints: Arc<HashMap<String, Url>>) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client, endpoints })
    }
}

#[async_trait::async_trait]
impl Recipient<SyncActionDeploymentMessage> for SyncDeploymentRecipient {
    async fn handle(
        &self,
        payload: &SyncActionDeploymentMessage,
        _token: CancellationToken,
    ) -> eyre::Result<()> {
        let base = self.endpoints.get(&payload.owner_module).ok_or_else(|| {
            eyre::eyre!("no endpoint configured for module {}", payload.owner_module)
        })?;

        let url = base.join("sync/apply")?;

        tracing::debug!(
            owner = %payload.owner_module,
            url = %url,
            actions = payload.request.actions.len(),
            "posting sync request"
        );

        let response = self.client.post(url).json(&payload.request).send().await?;

        let status = response.status();

        // 207 counts as failure: the whole request is retried, which is safe
        // under at-least-once semantics.
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            eyre::bail!(
                "sync apply to {} returned {status}: {body}",
                payload.owner_module
            );
        }

        Ok(())
    }
}
