//! Error types for the mailer layer.
//!
//! Configuration errors (`UnknownMailer`, `NoDefaultMailer`,
//! `MissingTemplateEngine`) are programmer errors and surface immediately.
//! Transport failures are wrapped once in [`MailError::Transport`] and never
//! retried here.

use thiserror::Error;

use crate::config::ConfigError;
use crate::models::CompiledMail;

/// Result type for mailer operations.
pub type MailResult<T> = Result<T, MailError>;

/// Boxed error used as the cause of a [`TransportError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by messages, mailers and the manager.
#[derive(Debug, Error)]
pub enum MailError {
    /// `mailer(name)` was given a name absent from the configuration
    #[error("Unknown mailer \"{0}\". Make sure it is configured inside the mailers list")]
    UnknownMailer(String),

    /// A default lookup was requested but no default mailer is configured
    #[error("Cannot use the default mailer. No default mailer has been configured")]
    NoDefaultMailer,

    /// A pending view exists but no template engine is configured
    #[error("Cannot render templates without a template engine")]
    MissingTemplateEngine,

    /// The template engine failed to render a view
    #[error("Failed to render template \"{template}\": {message}")]
    Render { template: String, message: String },

    /// Provider-specific delivery failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The messenger could not accept the mail
    #[error("Queue error: {0}")]
    Queue(String),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MailError {
    /// Whether this error is a programmer/configuration error rather than a
    /// delivery failure.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::UnknownMailer(_)
            | Self::NoDefaultMailer
            | Self::MissingTemplateEngine
            | Self::Config(_) => true,
            Self::Transport(err) => err.kind == TransportErrorKind::Configuration,
            Self::Render { .. } | Self::Queue(_) => false,
        }
    }
}

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Invalid credentials, malformed addresses, unsupported message shape
    Configuration,
    /// Network or provider hiccup; the caller may try again
    Transient,
    /// The provider accepted the connection but refused the message
    Rejected,
}

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
#[error("{transport} transport error: {message}")]
pub struct TransportError {
    pub transport: &'static str,
    pub kind: TransportErrorKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl TransportError {
    pub fn new(
        transport: &'static str,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(transport: &'static str, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Configuration, message)
    }

    pub fn transient(transport: &'static str, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Transient, message)
    }

    pub fn rejected(transport: &'static str, message: impl Into<String>) -> Self {
        Self::new(transport, TransportErrorKind::Rejected, message)
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A queued delivery that failed in the background.
///
/// Handed to the messenger monitor together with the mail that could not be
/// delivered.
#[derive(Debug, Error)]
#[error("Failed to deliver queued mail: {error}")]
pub struct QueuedMailError {
    pub mail: Box<CompiledMail>,
    #[source]
    pub error: MailError,
}

/// Raised by the fake-mode assertion helpers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure describing a count mismatch.
    pub fn count(subject: &str, action: &str, expected: usize, actual: usize) -> Self {
        Self::new(format!(
            "Expected {subject} to be {action} {expected} time(s), \
             but was {action} {actual} time(s)"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mailer_names_the_mailer() {
        let err = MailError::UnknownMailer("mailgun".to_string());
        assert!(err.to_string().contains("\"mailgun\""));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TransportError::transient("smtp", "connection dropped").with_source(io);

        assert_eq!(err.to_string(), "smtp transport error: connection dropped");
        assert!(std::error::Error::source(&err).is_some());

        let mail_err = MailError::from(err);
        assert!(!mail_err.is_configuration());
    }

    #[test]
    fn test_count_failure_message() {
        let failure = AssertionFailure::count("VerifyEmail", "sent", 1, 2);
        assert!(failure.message.contains('1'));
        assert!(failure.message.contains('2'));
    }
}
