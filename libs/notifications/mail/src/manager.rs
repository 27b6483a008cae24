//! MailManager: registry of named mailers.
//!
//! Mailers are built lazily from their factory on first lookup and cached by
//! name until `close`/`close_all` evicts them. While faked, every lookup
//! returns the shared [`FakeMailer`] instead.
//!
//! ```ignore
//! let manager = MailManager::builder()
//!     .config(MailConfig::from_env()?)
//!     .mailer("smtp", || Ok(SmtpTransport::from_env()?))
//!     .mailer("preview", || Ok(JsonTransport::new()))
//!     .template_engine(engine)
//!     .build();
//!
//! manager
//!     .send(|message| {
//!         message.to("user@example.com").subject("Hello").text("Hi");
//!     })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::MailConfig;
use crate::error::{MailError, MailResult};
use crate::events::{Emitter, MailEvent};
use crate::fake::FakeMailer;
use crate::mail::Mail;
use crate::mailer::Mailer;
use crate::message::Message;
use crate::messenger::Messenger;
use crate::templates::TemplateEngine;
use crate::transport::{SendResult, Transport};

/// Builds the transport of one named mailer
pub type TransportFactory = Arc<dyn Fn() -> MailResult<Box<dyn Transport>> + Send + Sync>;

/// Builds the messenger of a mailer
pub type MessengerFactory = Arc<dyn Fn(&Mailer) -> Arc<dyn Messenger> + Send + Sync>;

const FAKE_MAILER_NAME: &str = "fake";

enum Mode {
    Real,
    Fake(FakeMailer),
}

struct ManagerState {
    cache: HashMap<String, Mailer>,
    mode: Mode,
}

/// Builder for [`MailManager`]
#[derive(Default)]
pub struct MailManagerBuilder {
    config: MailConfig,
    factories: HashMap<String, TransportFactory>,
    templates: Option<Arc<dyn TemplateEngine>>,
    messenger: Option<MessengerFactory>,
}

impl MailManagerBuilder {
    pub fn config(mut self, config: MailConfig) -> Self {
        self.config = config;
        self
    }

    /// Mailer used when no name is given
    pub fn default_mailer(mut self, name: impl Into<String>) -> Self {
        self.config.default_mailer = Some(name.into());
        self
    }

    /// Register a named mailer. The factory runs on first lookup and again
    /// after the mailer is closed.
    ///
    /// The factory runs while the manager's registry lock is held, so it must
    /// not call back into the manager (`mailer`, `send`, ...); doing so
    /// deadlocks.
    pub fn mailer<F, T>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> MailResult<T> + Send + Sync + 'static,
        T: Transport + 'static,
    {
        let factory: TransportFactory =
            Arc::new(move || factory().map(|transport| Box::new(transport) as Box<dyn Transport>));
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn template_engine(mut self, engine: impl TemplateEngine + 'static) -> Self {
        self.templates = Some(Arc::new(engine));
        self
    }

    /// Messenger factory applied to every mailer the manager builds.
    ///
    /// Like transport factories, it runs under the registry lock and must not
    /// call back into the manager.
    pub fn messenger<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Mailer) -> Arc<dyn Messenger> + Send + Sync + 'static,
    {
        self.messenger = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> MailManager {
        MailManager {
            config: self.config,
            factories: self.factories,
            templates: self.templates,
            messenger: RwLock::new(self.messenger),
            emitter: Emitter::new(),
            state: Mutex::new(ManagerState {
                cache: HashMap::new(),
                mode: Mode::Real,
            }),
        }
    }
}

pub struct MailManager {
    config: MailConfig,
    factories: HashMap<String, TransportFactory>,
    templates: Option<Arc<dyn TemplateEngine>>,
    messenger: RwLock<Option<MessengerFactory>>,
    emitter: Emitter,
    state: Mutex<ManagerState>,
}

impl MailManager {
    pub fn builder() -> MailManagerBuilder {
        MailManagerBuilder::default()
    }

    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    /// Look up a mailer by name, building and caching it on first use
    pub fn mailer(&self, name: &str) -> MailResult<Mailer> {
        let mut state = self.lock();

        if let Mode::Fake(fake) = &state.mode {
            return Ok(fake.mailer().clone());
        }

        if let Some(mailer) = state.cache.get(name) {
            return Ok(mailer.clone());
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| MailError::UnknownMailer(name.to_string()))?;

        let mailer = self.create_mailer(name, factory()?);
        state.cache.insert(name.to_string(), mailer.clone());

        debug!(mailer = name, transport = mailer.transport_name(), "Mailer created");
        Ok(mailer)
    }

    /// Look up the configured default mailer
    pub fn default_mailer(&self) -> MailResult<Mailer> {
        let name = self
            .config
            .default_mailer
            .as_deref()
            .ok_or(MailError::NoDefaultMailer)?;

        self.mailer(name)
    }

    /// Whether `name` is a registered mailer
    pub fn has_mailer(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Whether a mailer for `name` is currently cached
    pub fn is_cached(&self, name: &str) -> bool {
        self.lock().cache.contains_key(name)
    }

    fn create_mailer(&self, name: &str, transport: Box<dyn Transport>) -> Mailer {
        let mailer = Mailer::build(
            name.to_string(),
            transport,
            self.config.mailer.clone(),
            self.emitter.clone(),
            self.config.queue_concurrency,
            None,
        );

        if let Some(engine) = &self.templates {
            mailer.set_template_engine(engine.clone());
        }
        if let Some(factory) = self.messenger_factory() {
            mailer.set_messenger(factory(&mailer));
        }

        mailer
    }

    // -------------------------------------------------------------------------
    // Delegation to the default mailer
    // -------------------------------------------------------------------------

    pub async fn send<F>(&self, compose: F) -> MailResult<SendResult>
    where
        F: FnOnce(&mut Message) + Send,
    {
        self.default_mailer()?.send(compose).await
    }

    pub async fn send_later<F>(&self, compose: F) -> MailResult<()>
    where
        F: FnOnce(&mut Message) + Send,
    {
        self.default_mailer()?.send_later(compose).await
    }

    pub async fn send_mail<M: Mail>(&self, mail: M) -> MailResult<SendResult> {
        self.default_mailer()?.send_mail(mail).await
    }

    pub async fn send_mail_later<M: Mail>(&self, mail: M) -> MailResult<()> {
        self.default_mailer()?.send_mail_later(mail).await
    }

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    /// Route every lookup to a fresh [`FakeMailer`]. An active fake is
    /// restored first.
    pub async fn fake(&self) -> FakeMailer {
        let fake = FakeMailer::build(
            FAKE_MAILER_NAME.to_string(),
            self.config.mailer.clone(),
            self.emitter.clone(),
        );
        if let Some(engine) = &self.templates {
            fake.set_template_engine(engine.clone());
        }

        let previous = std::mem::replace(&mut self.lock().mode, Mode::Fake(fake.clone()));

        if let Mode::Fake(previous) = previous {
            if let Err(e) = previous.close().await {
                warn!(error = %e, "Failed to close previous fake mailer");
            }
        }

        info!("Mail manager faked");
        fake
    }

    /// Leave fake mode, clearing everything the fake captured
    pub async fn restore(&self) -> MailResult<()> {
        let previous = std::mem::replace(&mut self.lock().mode, Mode::Real);

        match previous {
            Mode::Fake(fake) => {
                info!("Mail manager restored");
                fake.close().await
            }
            Mode::Real => Ok(()),
        }
    }

    pub fn is_faked(&self) -> bool {
        matches!(self.lock().mode, Mode::Fake(_))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Evict and close one mailer. The next lookup builds a new transport.
    pub async fn close(&self, name: &str) -> MailResult<()> {
        let mailer = self.lock().cache.remove(name);

        match mailer {
            Some(mailer) => mailer.close().await,
            None => Ok(()),
        }
    }

    /// Evict every cached mailer and close them concurrently. Returns the
    /// first failure once all closes have finished.
    pub async fn close_all(&self) -> MailResult<()> {
        let mailers: Vec<Mailer> = self.lock().cache.drain().map(|(_, mailer)| mailer).collect();
        debug!(count = mailers.len(), "Closing all mailers");

        join_all(mailers.iter().map(|mailer| mailer.close()))
            .await
            .into_iter()
            .collect()
    }

    /// Set the messenger factory for cached mailers and every mailer built
    /// afterwards. The factory runs under the registry lock and must not call
    /// back into the manager.
    pub fn set_messenger<F>(&self, factory: F)
    where
        F: Fn(&Mailer) -> Arc<dyn Messenger> + Send + Sync + 'static,
    {
        let factory: MessengerFactory = Arc::new(factory);

        let state = self.lock();
        for mailer in state.cache.values() {
            mailer.set_messenger(factory(mailer));
        }
        *self.messenger.write().unwrap_or_else(|e| e.into_inner()) = Some(factory);
    }

    /// Receiver for events of every mailer this manager builds
    pub fn subscribe(&self) -> broadcast::Receiver<MailEvent> {
        self.emitter.subscribe()
    }

    fn messenger_factory(&self) -> Option<MessengerFactory> {
        self.messenger
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
