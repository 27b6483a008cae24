//! JSON transport: serialises the message instead of delivering it.
//!
//! Useful for previews and for environments where mail must not leave the
//! process. The serialised message is returned as the `original` response.

use super::{envelope_for, SendResult, Transport, TransportConfig};
use crate::error::TransportError;
use crate::models::MessageNode;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct JsonTransport;

impl JsonTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for JsonTransport {
    async fn send(
        &self,
        message: &MessageNode,
        config: Option<&TransportConfig>,
    ) -> Result<SendResult, TransportError> {
        let serialized = serde_json::to_string(message).map_err(|e| {
            TransportError::configuration(self.name(), "Message is not serialisable").with_source(e)
        })?;

        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| format!("<{}@json>", uuid::Uuid::new_v4()));

        debug!(message_id = %message_id, bytes = serialized.len(), "Serialised message");

        Ok(SendResult::new(message_id)
            .with_envelope(envelope_for(message))
            .with_original(json!({
                "message": serialized,
                "config": config.cloned(),
            })))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
