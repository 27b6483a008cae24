//! Transport implementations

pub mod fake;
pub mod json;
pub mod smtp;

pub use fake::FakeTransport;
pub use json::JsonTransport;
pub use smtp::{SmtpConfig, SmtpTransport};

use crate::error::TransportError;
use crate::models::{Envelope, MessageNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-send, transport-specific options (tags, tracking flags, ...).
pub type TransportConfig = Value;

/// Result of sending an email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    /// Provider-specific message ID
    pub message_id: String,
    /// Envelope the provider delivered to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
    /// Raw provider response
    #[serde(default)]
    pub original: Value,
}

impl SendResult {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            envelope: None,
            original: Value::Null,
        }
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn with_original(mut self, original: Value) -> Self {
        self.original = original;
        self
    }
}

/// Envelope derived from the message headers when none was set explicitly.
pub fn envelope_for(message: &MessageNode) -> Envelope {
    if let Some(envelope) = &message.envelope {
        return envelope.clone();
    }

    Envelope {
        from: message.from.as_ref().map(|from| from.address.clone()),
        to: message.to.iter().map(|a| a.address.clone()).collect(),
        cc: message.cc.iter().map(|a| a.address.clone()).collect(),
        bcc: message.bcc.iter().map(|a| a.address.clone()).collect(),
    }
}

/// Trait for delivery mechanisms
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message
    async fn send(
        &self,
        message: &MessageNode,
        config: Option<&TransportConfig>,
    ) -> Result<SendResult, TransportError>;

    /// Release pooled connections. Safe to call when nothing is open.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Get transport name
    fn name(&self) -> &'static str;
}
