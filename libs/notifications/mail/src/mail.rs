//! Class-based mails.
//!
//! A type implementing [`Mail`] describes one kind of email (welcome,
//! password reset, ...). Mailers never depend on the concrete type: they wrap
//! it in a [`PreparedMail`] which carries the message being built and a flag
//! that makes building idempotent.
//!
//! ```ignore
//! struct VerifyEmail {
//!     user: String,
//! }
//!
//! #[async_trait]
//! impl Mail for VerifyEmail {
//!     fn subject(&self) -> Option<String> {
//!         Some("Verify your email".to_string())
//!     }
//!
//!     async fn prepare(&self, message: &mut Message) -> MailResult<()> {
//!         message
//!             .to(self.user.as_str())
//!             .html_view("emails/verify", json!({ "user": self.user }));
//!         Ok(())
//!     }
//! }
//!
//! mailer.send_mail(VerifyEmail { user: "ada@example.com".into() }).await?;
//! ```

use async_trait::async_trait;

use crate::error::MailResult;
use crate::mailer::Mailer;
use crate::message::Message;
use crate::models::Address;
use crate::transport::{SendResult, TransportConfig};

#[async_trait]
pub trait Mail: Send + Sync + 'static {
    /// Sender applied before `prepare` runs
    fn from(&self) -> Option<Address> {
        None
    }

    /// Reply-to applied before `prepare` runs
    fn reply_to(&self) -> Option<Address> {
        None
    }

    /// Subject applied before `prepare` runs
    fn subject(&self) -> Option<String> {
        None
    }

    /// Populate the message
    async fn prepare(&self, message: &mut Message) -> MailResult<()>;
}

/// A [`Mail`] together with the message it builds.
pub struct PreparedMail<M: Mail> {
    mail: M,
    message: Message,
    built: bool,
}

impl<M: Mail> PreparedMail<M> {
    pub fn new(mail: M) -> Self {
        Self {
            mail,
            message: Message::new(),
            built: false,
        }
    }

    /// Apply the mail's defaults and run `prepare`. Only the first call does
    /// anything.
    pub async fn build(&mut self) -> MailResult<()> {
        if self.built {
            return Ok(());
        }

        if let Some(from) = self.mail.from() {
            self.message.from(from);
        }
        if let Some(reply_to) = self.mail.reply_to() {
            self.message.reply_to(reply_to);
        }
        if let Some(subject) = self.mail.subject() {
            self.message.subject(subject);
        }

        self.mail.prepare(&mut self.message).await?;
        self.built = true;
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn mail(&self) -> &M {
        &self.mail
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub(crate) fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Send through `mailer`
    pub async fn send(self, mailer: &Mailer) -> MailResult<SendResult> {
        mailer.send_prepared(self, None).await
    }

    /// Queue through `mailer`
    pub async fn send_later(self, mailer: &Mailer) -> MailResult<()> {
        mailer.send_prepared_later(self, None).await
    }

    /// Send through `mailer` with transport options
    pub async fn send_with_config(
        self,
        mailer: &Mailer,
        config: TransportConfig,
    ) -> MailResult<SendResult> {
        mailer.send_prepared(self, Some(config)).await
    }
}

impl<M: Mail> From<M> for PreparedMail<M> {
    fn from(mail: M) -> Self {
        Self::new(mail)
    }
}
