//! Mailer orchestration
//!
//! One message-building API in front of interchangeable delivery mechanisms,
//! with deferred delivery and an in-memory fake for tests.
//!
//! ## Components
//!
//! - **Message**: fluent builder; template views render lazily at send time
//! - **Transport**: delivery contract (`SmtpTransport`, `JsonTransport`, `FakeTransport`)
//! - **Mailer**: binds a named configuration to one transport and emits events
//! - **Messenger**: deferred delivery (`MemoryQueueMessenger` by default)
//! - **MailManager**: lazily builds and caches named mailers; `fake()`/`restore()`
//! - **FakeMailer**: captures mail and offers an assertion DSL
//!
//! ## Usage
//!
//! ```ignore
//! use mail::{MailConfig, MailManager, FromEnv, SmtpTransport};
//!
//! let manager = MailManager::builder()
//!     .config(MailConfig::from_env()?)
//!     .mailer("smtp", || Ok(SmtpTransport::from_env()?))
//!     .build();
//!
//! manager
//!     .send(|message| {
//!         message
//!             .to("user@example.com")
//!             .subject("Welcome")
//!             .html_view("emails/welcome", json!({ "name": "Ada" }));
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod fake;
pub mod mail;
pub mod mailer;
pub mod manager;
pub mod message;
pub mod messenger;
pub mod models;
pub mod templates;
pub mod transport;

pub use config::{ConfigError, FromEnv, MailConfig, MailerConfig};
pub use error::{
    AssertionFailure, MailError, MailResult, QueuedMailError, TransportError, TransportErrorKind,
};
pub use events::{Emitter, EventPacket, MailEvent};
pub use fake::{FakeMailer, MailsCollection, MessagesCollection, Pattern};
pub use mail::{Mail, PreparedMail};
pub use mailer::{Mailer, WeakMailer};
pub use manager::{MailManager, MailManagerBuilder};
pub use message::{AttachmentOptions, IcalEventOptions, Message};
pub use messenger::{ImmediateMessenger, MemoryQueueMessenger, Messenger, Monitor};
pub use models::{Address, CompiledMail, Envelope, HeaderValue, MessageNode, Priority};
pub use templates::{HandlebarsEngine, TemplateEngine};
pub use transport::{
    FakeTransport, JsonTransport, SendResult, SmtpConfig, SmtpTransport, Transport, TransportConfig,
};
