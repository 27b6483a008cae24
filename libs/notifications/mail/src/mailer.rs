//! Mailer: one named configuration bound to one transport.
//!
//! The mailer is the only component that talks to a transport. A send runs
//! strictly in order: build → render views → `mail:sending` → transport →
//! `mail:sent`. Queued sends stop after `mail:queued`; delivery timing belongs
//! to the messenger.

use std::borrow::Cow;
use std::future::Future;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::config::{MailerConfig, DEFAULT_QUEUE_CONCURRENCY};
use crate::error::MailResult;
use crate::events::{Emitter, EventPacket, MailEvent};
use crate::fake::Recorder;
use crate::mail::{Mail, PreparedMail};
use crate::message::Message;
use crate::messenger::{MemoryQueueMessenger, Messenger};
use crate::models::{CompiledMail, ContentKind};
use crate::templates::TemplateEngine;
use crate::transport::{SendResult, Transport, TransportConfig};

struct MailerInner {
    name: String,
    transport: Box<dyn Transport>,
    config: MailerConfig,
    emitter: Emitter,
    queue_concurrency: usize,
    messenger: RwLock<Option<Arc<dyn Messenger>>>,
    templates: RwLock<Option<Arc<dyn TemplateEngine>>>,
    recorder: Option<Recorder>,
}

/// Cheap-clone handle; clones share the transport.
#[derive(Clone)]
pub struct Mailer {
    inner: Arc<MailerInner>,
}

/// Non-owning handle held by messengers.
#[derive(Clone)]
pub struct WeakMailer {
    inner: Weak<MailerInner>,
}

impl WeakMailer {
    pub fn upgrade(&self) -> Option<Mailer> {
        self.inner.upgrade().map(|inner| Mailer { inner })
    }
}

impl Mailer {
    /// Standalone mailer with its own event channel
    pub fn new(
        name: impl Into<String>,
        transport: impl Transport + 'static,
        config: MailerConfig,
    ) -> Self {
        Self::build(
            name.into(),
            Box::new(transport),
            config,
            Emitter::new(),
            DEFAULT_QUEUE_CONCURRENCY,
            None,
        )
    }

    pub(crate) fn build(
        name: String,
        transport: Box<dyn Transport>,
        config: MailerConfig,
        emitter: Emitter,
        queue_concurrency: usize,
        recorder: Option<Recorder>,
    ) -> Self {
        Self {
            inner: Arc::new(MailerInner {
                name,
                transport,
                config,
                emitter,
                queue_concurrency,
                messenger: RwLock::new(None),
                templates: RwLock::new(None),
                recorder,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn config(&self) -> &MailerConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakMailer {
        WeakMailer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same mailer
    pub fn ptr_eq(&self, other: &Mailer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Replace the messenger used by `send_later`. Mail already queued stays
    /// with the previous messenger.
    pub fn set_messenger(&self, messenger: Arc<dyn Messenger>) {
        *self
            .inner
            .messenger
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(messenger);
    }

    pub fn set_template_engine(&self, engine: Arc<dyn TemplateEngine>) {
        *self
            .inner
            .templates
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(engine);
    }

    /// Receiver for this mailer's lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<MailEvent> {
        self.inner.emitter.subscribe()
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Build a message with `compose` and send it.
    ///
    /// `compose` is synchronous. Use [`send_with`](Self::send_with) when
    /// building the message needs to await, or pass a ready message to
    /// [`send_message`](Self::send_message).
    pub async fn send<F>(&self, compose: F) -> MailResult<SendResult>
    where
        F: FnOnce(&mut Message) + Send,
    {
        self.send_with_config(compose, None).await
    }

    pub async fn send_with_config<F>(
        &self,
        compose: F,
        config: Option<TransportConfig>,
    ) -> MailResult<SendResult>
    where
        F: FnOnce(&mut Message) + Send,
    {
        let mut message = Message::new();
        compose(&mut message);
        self.send_message(message, config).await
    }

    /// Build a message with an async `compose` and send it
    ///
    /// ```ignore
    /// mailer
    ///     .send_with(|mut message| async move {
    ///         let user = users.find(id).await?;
    ///         message.to(user.email.as_str()).subject("Welcome");
    ///         Ok(message)
    ///     })
    ///     .await?;
    /// ```
    pub async fn send_with<F, Fut>(&self, compose: F) -> MailResult<SendResult>
    where
        F: FnOnce(Message) -> Fut + Send,
        Fut: Future<Output = MailResult<Message>> + Send,
    {
        let message = compose(Message::new()).await?;
        self.send_message(message, None).await
    }

    /// Send a message built elsewhere
    pub async fn send_message(
        &self,
        mut message: Message,
        config: Option<TransportConfig>,
    ) -> MailResult<SendResult> {
        self.compile(&mut message).await?;

        let response = self
            .send_compiled(&message.to_compiled(), config.as_ref())
            .await?;

        if let Some(recorder) = &self.inner.recorder {
            recorder.messages.record_sent(message);
        }

        Ok(response)
    }

    /// Build and send a class-based mail
    pub async fn send_mail<M: Mail>(&self, mail: M) -> MailResult<SendResult> {
        self.send_prepared(PreparedMail::new(mail), None).await
    }

    pub async fn send_prepared<M: Mail>(
        &self,
        mut mail: PreparedMail<M>,
        config: Option<TransportConfig>,
    ) -> MailResult<SendResult> {
        mail.build().await?;
        self.compile(mail.message_mut()).await?;

        let response = self
            .send_compiled(&mail.message().to_compiled(), config.as_ref())
            .await?;

        if let Some(recorder) = &self.inner.recorder {
            recorder.mails.record_sent(mail);
        }

        Ok(response)
    }

    /// Deliver an already compiled mail. Views still pending are rendered
    /// first.
    #[instrument(skip_all, fields(mailer = %self.inner.name))]
    pub async fn send_compiled(
        &self,
        mail: &CompiledMail,
        config: Option<&TransportConfig>,
    ) -> MailResult<SendResult> {
        let mail = self.render_pending(mail).await?;

        self.inner
            .emitter
            .emit(MailEvent::Sending(self.packet(&mail, None)));

        let response = self.inner.transport.send(&mail.message, config).await?;

        info!(
            message_id = %response.message_id,
            subject = ?mail.message.subject,
            "Email sent successfully"
        );

        self.inner
            .emitter
            .emit(MailEvent::Sent(self.packet(&mail, Some(response.clone()))));

        Ok(response)
    }

    // -------------------------------------------------------------------------
    // Queueing
    // -------------------------------------------------------------------------

    /// Build a message with `compose` and hand it to the messenger
    pub async fn send_later<F>(&self, compose: F) -> MailResult<()>
    where
        F: FnOnce(&mut Message) + Send,
    {
        self.send_later_with_config(compose, None).await
    }

    pub async fn send_later_with_config<F>(
        &self,
        compose: F,
        config: Option<TransportConfig>,
    ) -> MailResult<()>
    where
        F: FnOnce(&mut Message) + Send,
    {
        let mut message = Message::new();
        compose(&mut message);
        self.send_message_later(message, config).await
    }

    /// Queue a message built by an async `compose`
    pub async fn send_later_with<F, Fut>(&self, compose: F) -> MailResult<()>
    where
        F: FnOnce(Message) -> Fut + Send,
        Fut: Future<Output = MailResult<Message>> + Send,
    {
        let message = compose(Message::new()).await?;
        self.send_message_later(message, None).await
    }

    pub async fn send_message_later(
        &self,
        mut message: Message,
        config: Option<TransportConfig>,
    ) -> MailResult<()> {
        self.compile(&mut message).await?;
        self.queue_compiled(message.to_compiled(), config).await?;

        if let Some(recorder) = &self.inner.recorder {
            recorder.messages.record_queued(message);
        }

        Ok(())
    }

    pub async fn send_mail_later<M: Mail>(&self, mail: M) -> MailResult<()> {
        self.send_prepared_later(PreparedMail::new(mail), None).await
    }

    pub async fn send_prepared_later<M: Mail>(
        &self,
        mut mail: PreparedMail<M>,
        config: Option<TransportConfig>,
    ) -> MailResult<()> {
        mail.build().await?;
        self.compile(mail.message_mut()).await?;
        self.queue_compiled(mail.message().to_compiled(), config)
            .await?;

        if let Some(recorder) = &self.inner.recorder {
            recorder.mails.record_queued(mail);
        }

        Ok(())
    }

    #[instrument(skip_all, fields(mailer = %self.inner.name))]
    async fn queue_compiled(
        &self,
        mail: CompiledMail,
        config: Option<TransportConfig>,
    ) -> MailResult<()> {
        let packet = self.packet(&mail, None);
        self.inner
            .emitter
            .emit(MailEvent::Queueing(packet.clone()));

        self.messenger().queue(mail, config).await?;

        debug!(subject = ?packet.message.subject, "Mail handed to messenger");
        self.inner.emitter.emit(MailEvent::Queued(packet));
        Ok(())
    }

    /// Release the transport's resources
    pub async fn close(&self) -> MailResult<()> {
        self.inner.transport.close().await?;
        debug!(mailer = %self.inner.name, "Mailer closed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Apply configured defaults the message left unset, then render views.
    async fn compile(&self, message: &mut Message) -> MailResult<()> {
        let node = message.node_mut();
        if node.from.is_none() {
            node.from = self.inner.config.from.clone();
        }
        if node.reply_to.is_empty() {
            node.reply_to.extend(self.inner.config.reply_to.clone());
        }

        let engine = self.template_engine();
        message.compute_contents(engine.as_deref()).await
    }

    async fn render_pending<'a>(
        &self,
        mail: &'a CompiledMail,
    ) -> MailResult<Cow<'a, CompiledMail>> {
        let pending = ContentKind::ALL
            .into_iter()
            .any(|kind| mail.views.get(kind).is_some() && mail.message.content(kind).is_none());

        if !pending {
            return Ok(Cow::Borrowed(mail));
        }

        let mut message = Message::from_compiled(mail.clone());
        let engine = self.template_engine();
        message.compute_contents(engine.as_deref()).await?;
        Ok(Cow::Owned(message.into_compiled()))
    }

    fn template_engine(&self) -> Option<Arc<dyn TemplateEngine>> {
        self.inner
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The configured messenger, or a memory queue created on first use
    fn messenger(&self) -> Arc<dyn Messenger> {
        let mut slot = self
            .inner
            .messenger
            .write()
            .unwrap_or_else(|e| e.into_inner());

        slot.get_or_insert_with(|| {
            Arc::new(
                MemoryQueueMessenger::new(self).with_concurrency(self.inner.queue_concurrency),
            )
        })
        .clone()
    }

    fn packet(&self, mail: &CompiledMail, response: Option<SendResult>) -> EventPacket {
        EventPacket {
            mailer_name: self.inner.name.clone(),
            message: mail.message.clone(),
            views: mail.views.clone(),
            response,
        }
    }
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("name", &self.inner.name)
            .field("transport", &self.inner.transport.name())
            .finish()
    }
}
