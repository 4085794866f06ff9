//! Startup-built mapping from payload type tags to recipients.
//!
//! The registry doubles as the type resolver: a tag is resolvable iff some
//! registration declared it, and each entry carries a decoder for the
//! payload type alongside the ordered recipient list. Registration happens
//! before the processor starts; reads need no locking afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::bus::Payload;

/// Handles one payload delivery.
///
/// A fresh instance is constructed per invocation through the registered
/// factory, so implementations may keep per-delivery state without leaking
/// it across messages.
#[async_trait::async_trait]
pub trait Recipient<P: Payload>: Send + Sync {
    async fn handle(&self, payload: &P, token: CancellationToken) -> eyre::Result<()>;
}

type AnyPayload = Arc<dyn Any + Send + Sync>;

type InvokeFn =
    Arc<dyn Fn(AnyPayload, CancellationToken) -> BoxFuture<'static, eyre::Result<()>> + Send + Sync>;

pub struct Registration {
    recipient: &'static str,
    invoke: InvokeFn,
}

impl Registration {
    pub fn recipient(&self) -> &'static str {
        self.recipient
    }

    pub async fn invoke(
        &self,
        payload: AnyPayload,
        token: CancellationToken,
    ) -> eyre::Result<()> {
        (self.invoke)(payload, token).await
    }
}

struct Entry {
    decode: fn(&str) -> serde_json::Result<AnyPayload>,
    recipients: Vec<Registration>,
}

#[derive(Default)]
pub struct RecipientRegistry {
    entries: HashMap<&'static str, Entry>,
}

impl RecipientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a payload type resolvable without attaching any recipient.
    ///
    /// A resolvable type with zero recipients completes immediately when
    /// processed; an unresolvable one is dead-lettered.
    pub fn register_payload<P: Payload>(&mut self) {
        self.entries.entry(P::TYPE_NAME).or_insert_with(|| Entry {
            decode: decode_payload::<P>,
            recipients: Vec::new(),
        });
    }

    /// Register a recipient factory for a payload type. Registering the same
    /// recipient type twice for one payload is a no-op.
    pub fn register<P, R, F>(&mut self, factory: F)
    where
        P: Payload,
        R: Recipient<P> + 'static,
        F: Fn() -> R + Send + Sync + 'static,
    {
        let entry = self.entries.entry(P::TYPE_NAME).or_insert_with(|| Entry {
            decode: decode_payload::<P>,
            recipients: Vec::new(),
        });

        let name = std::any::type_name::<R>();
        if entry.recipients.iter().any(|r| r.recipient == name) {
            return;
        }

        let factory = Arc::new(factory);

        entry.recipients.push(Registration {
            recipient: name,
            invoke: Arc::new(move |payload, token| {
                let factory = Arc::clone(&factory);
                Box::pin(async move {
                    let payload = payload
                        .downcast::<P>()
                        .map_err(|_| eyre::eyre!("payload tag mismatch for {}", P::TYPE_NAME))?;
                    let recipient = factory();
                    recipient.handle(&payload, token).await
                })
            }),
        });
    }

    pub fn resolves(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Decode a stored payload body for a tag, or `None` when the tag is
    /// unknown to this registry.
    pub fn decode(&self, type_name: &str, body: &str) -> Option<serde_json::Result<AnyPayload>> {
        self.entries.get(type_name).map(|entry| (entry.decode)(body))
    }

    /// Recipients in registration order; empty for unknown tags.
    pub fn recipients(&self, type_name: &str) -> &[Registration] {
        self.entries
            .get(type_name)
            .map(|entry| entry.recipients.as_slice())
            .unwrap_or(&[])
    }
}

fn decode_payload<P: Payload>(body: &str) -> serde_json::Result<AnyPayload> {
    serde_json::from_str::<P>(body).map(|payload| Arc::new(payload) as AnyPayload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Payload for Ping {
        const TYPE_NAME: &'static str = "test.ping";
    }

    struct CountingRecipient;

    #[async_trait::async_trait]
    impl Recipient<Ping> for CountingRecipient {
        async fn handle(&self, _payload: &Ping, _token: CancellationToken) -> eyre::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_noop() {
        let mut registry = RecipientRegistry::new();
        registry.register::<Ping, _, _>(|| CountingRecipient);
        registry.register::<Ping, _, _>(|| CountingRecipient);

        assert_eq!(registry.recipients(Ping::TYPE_NAME).len(), 1);
    }

    #[test]
    fn unknown_tag_yields_empty_set() {
        let registry = RecipientRegistry::new();

        assert!(!registry.resolves("test.unknown"));
        assert!(registry.recipients("test.unknown").is_empty());
        assert!(registry.decode("test.unknown", "{}").is_none());
    }

    #[test]
    fn registered_payload_without_recipients_resolves() {
        let mut registry = RecipientRegistry::new();
        registry.register_payload::<Ping>();

        assert!(registry.resolves(Ping::TYPE_NAME));
        assert!(registry.recipients(Ping::TYPE_NAME).is_empty());
    }

    #[tokio::test]
    async fn decode_and_invoke_round_trip() {
        let mut registry = RecipientRegistry::new();
        registry.register::<Ping, _, _>(|| CountingRecipient);

        let payload = registry
            .decode(Ping::TYPE_NAME, r#"{"seq":1}"#)
            .unwrap()
            .unwrap();

        let recipients = registry.recipients(Ping::TYPE_NAME);
        recipients[0]
            .invoke(payload, CancellationToken::new())
            .await
            .unwrap();
    }
}
