//! Environment-driven configuration.
//!
//! Environment variables:
//!
//! | Variable | Required | Description |
//! |----------|----------|-------------|
//! | `MAIL_MAILER` | No | Name of the default mailer |
//! | `MAIL_FROM_ADDRESS` | No | Global default sender address |
//! | `MAIL_FROM_NAME` | No | Display name for the default sender |
//! | `MAIL_REPLY_TO` | No | Global default reply-to address |
//! | `MAIL_QUEUE_CONCURRENCY` | No | In-flight deliveries of the memory queue (default: 10) |

use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::models::Address;

/// Default number of concurrent deliveries for the in-memory queue.
pub const DEFAULT_QUEUE_CONCURRENCY: usize = 10;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Helper to load an optional environment variable, ignoring empty values
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Helper to parse an environment variable, falling back to `default` when unset
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Defaults shared by every mailer created by a manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailerConfig {
    /// Sender applied when a message does not set one
    pub from: Option<Address>,
    /// Reply-to applied when a message does not set one
    pub reply_to: Option<Address>,
}

impl MailerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_from(mut self, from: impl Into<Address>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<Address>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Manager-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    /// Mailer used when no name is given
    pub default_mailer: Option<String>,
    /// Defaults applied by every mailer
    pub mailer: MailerConfig,
    /// Concurrency of the default in-memory queue
    pub queue_concurrency: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            default_mailer: None,
            mailer: MailerConfig::default(),
            queue_concurrency: DEFAULT_QUEUE_CONCURRENCY,
        }
    }
}

impl FromEnv for MailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let from = env_optional("MAIL_FROM_ADDRESS").map(|address| Address {
            address,
            name: env_optional("MAIL_FROM_NAME"),
        });

        let queue_concurrency = env_parse("MAIL_QUEUE_CONCURRENCY", DEFAULT_QUEUE_CONCURRENCY)?;
        if queue_concurrency == 0 {
            return Err(ConfigError::ParseError {
                key: "MAIL_QUEUE_CONCURRENCY".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            default_mailer: env_optional("MAIL_MAILER"),
            mailer: MailerConfig {
                from,
                reply_to: env_optional("MAIL_REPLY_TO").map(Address::new),
            },
            queue_concurrency,
        })
    }
}
