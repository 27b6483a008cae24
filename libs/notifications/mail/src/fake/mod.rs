//! Fake mode: capture mail in memory and assert on it.
//!
//! ```ignore
//! let fake = manager.fake().await;
//!
//! signup(&manager, "ada@example.com").await?;
//!
//! fake.mails().assert_sent::<VerifyEmail>()?;
//! fake.messages().assert_sent(json!({ "subject": "Welcome" }))?;
//!
//! manager.restore().await?;
//! ```

mod collections;
mod pattern;

pub use collections::{MailsCollection, MessagesCollection};
pub use pattern::Pattern;

use std::ops::Deref;
use std::sync::Arc;

use crate::config::{MailerConfig, DEFAULT_QUEUE_CONCURRENCY};
use crate::error::MailResult;
use crate::events::Emitter;
use crate::mailer::Mailer;
use crate::messenger::ImmediateMessenger;
use crate::transport::FakeTransport;

/// Capture stores a mailer writes to while faked
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    pub(crate) messages: MessagesCollection,
    pub(crate) mails: MailsCollection,
}

/// Mailer substitute backed by a [`FakeTransport`].
///
/// Derefs to [`Mailer`], so it offers the same send surface. Queued mail is
/// delivered before `send_later` returns.
#[derive(Clone)]
pub struct FakeMailer {
    mailer: Mailer,
    transport: FakeTransport,
    recorder: Recorder,
}

impl FakeMailer {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), MailerConfig::default(), Emitter::new())
    }

    pub(crate) fn build(name: String, config: MailerConfig, emitter: Emitter) -> Self {
        let transport = FakeTransport::new();
        let recorder = Recorder::default();

        let mailer = Mailer::build(
            name,
            Box::new(transport.clone()),
            config,
            emitter,
            DEFAULT_QUEUE_CONCURRENCY,
            Some(recorder.clone()),
        );
        mailer.set_messenger(Arc::new(ImmediateMessenger::new(&mailer)));

        Self {
            mailer,
            transport,
            recorder,
        }
    }

    /// Messages sent or queued with a compose closure
    pub fn messages(&self) -> &MessagesCollection {
        &self.recorder.messages
    }

    /// Class-based mails sent or queued
    pub fn mails(&self) -> &MailsCollection {
        &self.recorder.mails
    }

    /// Every wire node that reached the transport
    pub fn transport(&self) -> &FakeTransport {
        &self.transport
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    /// Clear every capture store and close the transport
    pub async fn close(&self) -> MailResult<()> {
        self.recorder.messages.clear();
        self.recorder.mails.clear();
        self.mailer.close().await
    }
}

impl Deref for FakeMailer {
    type Target = Mailer;

    fn deref(&self) -> &Mailer {
        &self.mailer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Mail;
    use crate::message::Message;
    use async_trait::async_trait;
    use serde_json::json;

    struct Newsletter;

    #[async_trait]
    impl Mail for Newsletter {
        async fn prepare(&self, message: &mut Message) -> MailResult<()> {
            message.to("reader@example.com").subject("News").text("...");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_closure_sends_are_captured_as_messages() {
        let fake = FakeMailer::new("fake");

        fake.send(|message| {
            message.to("user@example.com").subject("Welcome").text("Hi");
        })
        .await
        .unwrap();

        fake.messages().assert_sent(json!({ "subject": "Welcome" })).unwrap();
        fake.messages().assert_none_queued().unwrap();
        fake.mails().assert_none_sent().unwrap();
        assert_eq!(fake.transport().sent_count(), 1);
    }

    #[tokio::test]
    async fn test_send_later_delivers_immediately_and_captures_as_queued() {
        let fake = FakeMailer::new("fake");

        fake.send_mail_later(Newsletter).await.unwrap();

        fake.mails().assert_queued::<Newsletter>().unwrap();
        fake.mails().assert_none_sent().unwrap();
        assert!(fake
            .transport()
            .find(json!({ "subject": "News" }))
            .is_some());
    }

    #[tokio::test]
    async fn test_close_clears_captures() {
        let fake = FakeMailer::new("fake");
        fake.send_mail(Newsletter).await.unwrap();
        fake.send(|message| {
            message.to("a@example.com").text("x");
        })
        .await
        .unwrap();

        fake.close().await.unwrap();

        fake.mails().assert_none_sent().unwrap();
        fake.messages().assert_none_sent().unwrap();
        assert_eq!(fake.transport().sent_count(), 0);
    }
}
