//! Fake transport for testing

use super::{envelope_for, SendResult, Transport, TransportConfig};
use crate::error::TransportError;
use crate::fake::Pattern;
use crate::models::MessageNode;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Fake transport that captures sent messages instead of delivering them.
///
/// Clones share the same capture store.
#[derive(Clone, Default)]
pub struct FakeTransport {
    sent: Arc<Mutex<Vec<MessageNode>>>,
    failure_message: Option<String>,
}

impl FakeTransport {
    /// Create a new fake transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake transport that always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Arc::default(),
            failure_message: Some(message.into()),
        }
    }

    /// Get all sent messages
    pub fn sent(&self) -> Vec<MessageNode> {
        self.lock().clone()
    }

    /// Get the count of sent messages
    pub fn sent_count(&self) -> usize {
        self.lock().len()
    }

    /// The most recently sent message
    pub fn last_sent(&self) -> Option<MessageNode> {
        self.lock().last().cloned()
    }

    /// First sent message matching the pattern
    pub fn find(&self, pattern: impl Into<Pattern>) -> Option<MessageNode> {
        let pattern = pattern.into();
        self.lock()
            .iter()
            .find(|message| pattern.is_match(&message.to_value()))
            .cloned()
    }

    /// Every sent message matching the pattern
    pub fn filter(&self, pattern: impl Into<Pattern>) -> Vec<MessageNode> {
        let pattern = pattern.into();
        self.lock()
            .iter()
            .filter(|message| pattern.is_match(&message.to_value()))
            .cloned()
            .collect()
    }

    /// Clear all sent messages
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MessageNode>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        message: &MessageNode,
        _config: Option<&TransportConfig>,
    ) -> Result<SendResult, TransportError> {
        if let Some(failure) = &self.failure_message {
            return Err(TransportError::transient(self.name(), failure.clone()));
        }

        self.lock().push(message.clone());

        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| format!("fake-{}", uuid::Uuid::new_v4()));

        Ok(SendResult::new(message_id)
            .with_envelope(envelope_for(message))
            .with_original(message.to_value()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;
    use serde_json::json;

    fn message(to: &str, subject: &str) -> MessageNode {
        MessageNode {
            to: vec![Address::new(to)],
            subject: Some(subject.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fake_transport_captures_messages() {
        let transport = FakeTransport::new();

        let result = transport
            .send(&message("test@example.com", "Test Subject"), None)
            .await
            .unwrap();
        assert!(result.message_id.starts_with("fake-"));
        assert_eq!(result.envelope.unwrap().to, vec!["test@example.com"]);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to[0].address, "test@example.com");
    }

    #[tokio::test]
    async fn test_fake_transport_fails() {
        let transport = FakeTransport::failing("Simulated failure");

        let err = transport
            .send(&message("test@example.com", "Test"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Simulated failure"));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_find_and_filter_by_subset() {
        let transport = FakeTransport::new();
        transport.send(&message("a@example.com", "Welcome"), None).await.unwrap();
        transport.send(&message("b@example.com", "Welcome"), None).await.unwrap();
        transport.send(&message("c@example.com", "Invoice"), None).await.unwrap();

        let found = transport.find(json!({ "subject": "Invoice" })).unwrap();
        assert_eq!(found.to[0].address, "c@example.com");

        assert!(transport.find(json!({ "subject": "Missing" })).is_none());
        assert_eq!(transport.filter(json!({ "subject": "Welcome" })).len(), 2);
        assert_eq!(
            transport
                .filter(json!({ "to": [{ "address": "b@example.com" }] }))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_clones_share_store_and_close_clears() {
        let transport = FakeTransport::new();
        let handle = transport.clone();

        transport.send(&message("a@example.com", "Hi"), None).await.unwrap();
        assert_eq!(handle.sent_count(), 1);

        handle.close().await.unwrap();
        assert_eq!(transport.sent_count(), 0);
    }
}
