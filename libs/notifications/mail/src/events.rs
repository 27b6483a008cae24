//! Lifecycle events emitted by mailers.
//!
//! Every send emits `mail:sending` then `mail:sent`; every queue call emits
//! `mail:queueing` then `mail:queued`. Events are broadcast to any number of
//! subscribers; emitting with nobody listening is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{ContentViews, MessageNode};
use crate::transport::SendResult;

const CHANNEL_CAPACITY: usize = 64;

/// Data carried by every mail event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPacket {
    pub mailer_name: String,
    pub message: MessageNode,
    pub views: ContentViews,
    /// Transport response, present on `mail:sent` only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<SendResult>,
}

/// Mail lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum MailEvent {
    Sending(EventPacket),
    Sent(EventPacket),
    Queueing(EventPacket),
    Queued(EventPacket),
}

impl MailEvent {
    /// Event name as exposed to listeners
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sending(_) => "mail:sending",
            Self::Sent(_) => "mail:sent",
            Self::Queueing(_) => "mail:queueing",
            Self::Queued(_) => "mail:queued",
        }
    }

    pub fn packet(&self) -> &EventPacket {
        match self {
            Self::Sending(packet)
            | Self::Sent(packet)
            | Self::Queueing(packet)
            | Self::Queued(packet) => packet,
        }
    }
}

/// Broadcast channel shared by a manager and its mailers.
#[derive(Clone)]
pub struct Emitter {
    tx: broadcast::Sender<MailEvent>,
}

impl Emitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: MailEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "No event listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MailEvent> {
        self.tx.subscribe()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> EventPacket {
        EventPacket {
            mailer_name: "smtp".to_string(),
            message: MessageNode {
                subject: Some("Hi".to_string()),
                ..Default::default()
            },
            views: ContentViews::default(),
            response: None,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let emitter = Emitter::new();
        let mut rx = emitter.subscribe();

        emitter.emit(MailEvent::Sending(packet()));
        emitter.emit(MailEvent::Sent(packet()));

        assert_eq!(rx.recv().await.unwrap().name(), "mail:sending");
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.name(), "mail:sent");
        assert_eq!(sent.packet().mailer_name, "smtp");
    }

    #[test]
    fn test_emit_without_listeners_is_silent() {
        let emitter = Emitter::new();
        emitter.emit(MailEvent::Queued(packet()));
    }
}
