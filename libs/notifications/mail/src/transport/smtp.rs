//! SMTP transport using lettre

use super::{SendResult, Transport, TransportConfig};
use crate::config::{env_optional, env_or_default, env_parse, env_required, ConfigError, FromEnv};
use crate::error::{TransportError, TransportErrorKind};
use crate::models::{
    Address, AttachmentSource, Envelope, HeaderValue, IcalSource, ListHeader, MessageNode,
    Priority,
};
use async_trait::async_trait;
use lettre::{
    address::Envelope as SmtpEnvelope,
    message::{
        header::{ContentTransferEncoding, ContentType, HeaderName, HeaderValue as RawHeader},
        Attachment, Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const NAME: &str = "smtp";

/// SMTP transport configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl SmtpConfig {
    /// Configuration for Mailhog/Mailpit (local development)
    ///
    /// Connects to localhost:1025 without authentication.
    pub fn local() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            use_tls: false,
            timeout: 10,
        }
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_required("SMTP_HOST")?,
            port: env_parse("SMTP_PORT", 587)?,
            username: env_or_default("SMTP_USERNAME", ""),
            password: env_or_default("SMTP_PASSWORD", ""),
            use_tls: env_optional("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            timeout: env_parse("SMTP_TIMEOUT", 10)?,
        })
    }
}

/// SMTP transport
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpTransport {
    /// Create a new SMTP transport
    pub fn new(config: SmtpConfig) -> Result<Self, TransportError> {
        let timeout = Some(Duration::from_secs(config.timeout));

        let transport = if config.use_tls {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| {
                    TransportError::configuration(NAME, "Failed to create SMTP relay")
                        .with_source(e)
                })?
                .credentials(creds)
                .port(config.port)
                .timeout(timeout)
                .build()
        } else if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .credentials(creds)
                .port(config.port)
                .timeout(timeout)
                .build()
        } else {
            // No auth (for Mailpit/Mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(timeout)
                .build()
        };

        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Create a transport from environment variables
    pub fn from_env() -> Result<Self, TransportError> {
        let config = SmtpConfig::from_env().map_err(|e| {
            TransportError::configuration(NAME, "Invalid SMTP configuration").with_source(e)
        })?;
        Self::new(config)
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    async fn build_message(&self, message: &MessageNode) -> Result<Message, TransportError> {
        let from = message
            .from
            .as_ref()
            .ok_or_else(|| TransportError::configuration(NAME, "Message has no sender"))?;

        let mut builder = Message::builder().from(mailbox(from)?);

        for to in &message.to {
            builder = builder.to(mailbox(to)?);
        }
        for cc in &message.cc {
            builder = builder.cc(mailbox(cc)?);
        }
        for bcc in &message.bcc {
            builder = builder.bcc(mailbox(bcc)?);
        }
        for reply_to in &message.reply_to {
            builder = builder.reply_to(mailbox(reply_to)?);
        }

        if let Some(subject) = &message.subject {
            builder = builder.subject(subject);
        }
        if let Some(message_id) = &message.message_id {
            builder = builder.message_id(Some(message_id.clone()));
        }
        if let Some(in_reply_to) = &message.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }
        if !message.references.is_empty() {
            builder = builder.references(message.references.join(" "));
        }
        if let Some(envelope) = &message.envelope {
            builder = builder.envelope(smtp_envelope(envelope)?);
        }
        if let Some(priority) = message.priority {
            builder = builder.raw_header(raw_header("X-Priority", x_priority(priority))?);
        }

        for header in &message.headers {
            let value = match &header.value {
                HeaderValue::Raw(value) => raw_header(&header.key, value.clone())?,
                HeaderValue::Prepared(value) => RawHeader::dangerous_new_pre_encoded(
                    header_name(&header.key)?,
                    value.clone(),
                    value.clone(),
                ),
            };
            builder = builder.raw_header(value);
        }

        for (kind, entries) in &message.list {
            let header = raw_header(&list_header_name(kind), list_header_value(entries))?;
            builder = builder.raw_header(header);
        }

        let encoding = message.encoding.as_deref().map(transfer_encoding).transpose()?;

        // Alternatives, least preferred first
        let mut alternatives = Vec::new();
        if let Some(text) = &message.text {
            alternatives.push(body_part(ContentType::TEXT_PLAIN, text, encoding));
        }
        if let Some(watch) = &message.watch {
            let mime = content_type("text/watch-html; charset=utf-8")?;
            alternatives.push(body_part(mime, watch, encoding));
        }
        if let Some(html) = &message.html {
            alternatives.push(body_part(ContentType::TEXT_HTML, html, encoding));
        }

        let mut attachments = Vec::new();
        for attachment in &message.attachments {
            let bytes = match &attachment.source {
                AttachmentSource::Content(bytes) => bytes.clone(),
                AttachmentSource::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                    TransportError::configuration(NAME, format!("Cannot read attachment {}", path))
                        .with_source(e)
                })?,
            };
            let mime = content_type(
                attachment
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )?;

            let part = match &attachment.cid {
                Some(cid) => Attachment::new_inline(cid.clone()).body(bytes, mime),
                None => Attachment::new(
                    attachment
                        .filename
                        .clone()
                        .unwrap_or_else(|| "attachment".to_string()),
                )
                .body(bytes, mime),
            };
            attachments.push(part);
        }

        if let Some(event) = &message.ical_event {
            let content = match &event.source {
                IcalSource::Content(content) => content.clone(),
                IcalSource::Path(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                    let detail = format!("Cannot read calendar event {}", path);
                    TransportError::configuration(NAME, detail).with_source(e)
                })?,
                IcalSource::Href(url) => {
                    return Err(TransportError::configuration(
                        NAME,
                        format!("Remote calendar events are not supported: {}", url),
                    ));
                }
            };
            let method = event.method.as_deref().unwrap_or("PUBLISH");
            let mime = content_type(&format!("text/calendar; charset=utf-8; method={}", method))?;
            let filename = event.filename.clone().unwrap_or_else(|| "invite.ics".to_string());
            attachments.push(Attachment::new(filename).body(content, mime));
        }

        let body = if alternatives.len() > 1 {
            let mut parts = alternatives.into_iter();
            parts.next().map(|first| {
                let multipart = parts.fold(MultiPart::alternative().singlepart(first), |mp, part| {
                    mp.singlepart(part)
                });
                Body::Multi(multipart)
            })
        } else {
            alternatives.pop().map(Body::Single)
        };

        let mut attachments = attachments.into_iter();
        let built = match body {
            None if attachments.len() == 0 => {
                return Err(TransportError::configuration(
                    NAME,
                    "Email must have either text or HTML body",
                ));
            }
            Some(Body::Single(part)) if attachments.len() == 0 => builder.singlepart(part),
            Some(Body::Multi(multipart)) if attachments.len() == 0 => builder.multipart(multipart),
            Some(Body::Single(part)) => {
                let mixed = MultiPart::mixed().singlepart(part);
                builder.multipart(attachments.fold(mixed, |mp, a| mp.singlepart(a)))
            }
            Some(Body::Multi(multipart)) => {
                let mixed = MultiPart::mixed().multipart(multipart);
                builder.multipart(attachments.fold(mixed, |mp, a| mp.singlepart(a)))
            }
            None => {
                // Attachment-only message
                let first = attachments.next().ok_or_else(|| {
                    TransportError::configuration(NAME, "Email must have either text or HTML body")
                })?;
                let mixed = MultiPart::mixed().singlepart(first);
                builder.multipart(attachments.fold(mixed, |mp, a| mp.singlepart(a)))
            }
        };

        built.map_err(|e| {
            TransportError::configuration(NAME, "Failed to build message").with_source(e)
        })
    }
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

fn mailbox(address: &Address) -> Result<Mailbox, TransportError> {
    let email = address.address.parse::<lettre::Address>().map_err(|e| {
        let detail = format!("Invalid address {}", address.address);
        TransportError::configuration(NAME, detail).with_source(e)
    })?;
    Ok(Mailbox::new(address.name.clone(), email))
}

fn smtp_envelope(envelope: &Envelope) -> Result<SmtpEnvelope, TransportError> {
    let parse = |address: &String| {
        address.parse::<lettre::Address>().map_err(|e| {
            TransportError::configuration(NAME, format!("Invalid envelope address {}", address))
                .with_source(e)
        })
    };

    let from = envelope.from.as_ref().map(parse).transpose()?;
    let to = envelope
        .to
        .iter()
        .chain(envelope.cc.iter())
        .chain(envelope.bcc.iter())
        .map(parse)
        .collect::<Result<Vec<_>, _>>()?;

    SmtpEnvelope::new(from, to)
        .map_err(|e| TransportError::configuration(NAME, "Invalid envelope").with_source(e))
}

fn header_name(key: &str) -> Result<HeaderName, TransportError> {
    HeaderName::new_from_ascii(key.to_string()).map_err(|e| {
        TransportError::configuration(NAME, format!("Invalid header name {}", key)).with_source(e)
    })
}

fn raw_header(key: &str, value: String) -> Result<RawHeader, TransportError> {
    Ok(RawHeader::new(header_name(key)?, value))
}

fn content_type(value: &str) -> Result<ContentType, TransportError> {
    ContentType::parse(value).map_err(|e| {
        let detail = format!("Invalid content type {}", value);
        TransportError::configuration(NAME, detail).with_source(e)
    })
}

fn transfer_encoding(value: &str) -> Result<ContentTransferEncoding, TransportError> {
    match value.to_ascii_lowercase().as_str() {
        "quoted-printable" => Ok(ContentTransferEncoding::QuotedPrintable),
        "base64" => Ok(ContentTransferEncoding::Base64),
        "7bit" => Ok(ContentTransferEncoding::SevenBit),
        "8bit" => Ok(ContentTransferEncoding::EightBit),
        other => Err(TransportError::configuration(
            NAME,
            format!("Unsupported transfer encoding {}", other),
        )),
    }
}

fn body_part(
    mime: ContentType,
    content: &str,
    encoding: Option<ContentTransferEncoding>,
) -> SinglePart {
    let builder = SinglePart::builder().header(mime);
    match encoding {
        Some(encoding) => builder.header(encoding).body(content.to_string()),
        None => builder.body(content.to_string()),
    }
}

fn x_priority(priority: Priority) -> String {
    match priority {
        Priority::High => "1 (Highest)",
        Priority::Normal => "3 (Normal)",
        Priority::Low => "5 (Lowest)",
    }
    .to_string()
}

/// `help` -> `List-Help`
fn list_header_name(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => format!("List-{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => "List".to_string(),
    }
}

fn list_header_value(entries: &[ListHeader]) -> String {
    entries
        .iter()
        .map(|entry| {
            let url = if entry.url.contains(':') {
                entry.url.clone()
            } else {
                format!("mailto:{}", entry.url)
            };
            match &entry.comment {
                Some(comment) => format!("<{}> ({})", url, comment),
                None => format!("<{}>", url),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn classify(error: &lettre::transport::smtp::Error) -> TransportErrorKind {
    if error.is_permanent() {
        TransportErrorKind::Rejected
    } else if error.is_client() {
        TransportErrorKind::Configuration
    } else {
        TransportErrorKind::Transient
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(
        &self,
        message: &MessageNode,
        _config: Option<&TransportConfig>,
    ) -> Result<SendResult, TransportError> {
        let email = self.build_message(message).await?;

        let message_id = email
            .headers()
            .get_raw("Message-ID")
            .map(str::to_string)
            .unwrap_or_else(|| format!("<{}@{}>", uuid::Uuid::new_v4(), self.config.host));

        let smtp_envelope = email.envelope();
        let envelope = Envelope {
            from: smtp_envelope.from().map(|a| a.to_string()),
            to: smtp_envelope.to().iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        };

        let response = self.transport.send(email).await.map_err(|e| {
            let kind = classify(&e);
            TransportError::new(NAME, kind, "Failed to send email via SMTP").with_source(e)
        })?;

        info!(
            message_id = %message_id,
            recipients = envelope.to.len(),
            subject = ?message.subject,
            "Email sent successfully"
        );

        Ok(SendResult::new(message_id)
            .with_envelope(envelope)
            .with_original(json!({
                "code": response.code().to_string(),
                "message": response.message().collect::<Vec<_>>(),
            })))
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AttachmentOptions, IcalEventOptions, Message as MailMessage};

    fn transport() -> SmtpTransport {
        SmtpTransport::new(SmtpConfig::local()).unwrap()
    }

    fn formatted(email: &Message) -> String {
        String::from_utf8_lossy(&email.formatted()).into_owned()
    }

    #[tokio::test]
    async fn test_build_simple_text_message() {
        let mut message = MailMessage::new();
        message
            .from(("sender@example.com", "Sender"))
            .to("user@example.com")
            .subject("Hello")
            .text("Body text");

        let email = transport().build_message(message.node()).await.unwrap();
        let raw = formatted(&email);

        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("Body text"));
        assert_eq!(email.envelope().to().len(), 1);
    }

    #[tokio::test]
    async fn test_build_message_with_headers_and_attachments() {
        let mut message = MailMessage::new();
        message
            .from("sender@example.com")
            .to("user@example.com")
            .bcc("audit@example.com")
            .subject("Report")
            .text("See attached")
            .html("<p>See attached</p>")
            .header("X-Campaign", "spring")
            .list_help("admin@example.com?subject=help")
            .priority(Priority::High)
            .attach_data(
                b"a,b".to_vec(),
                AttachmentOptions::new().filename("data.csv").content_type("text/csv"),
            )
            .ical_event(
                "BEGIN:VCALENDAR\r\nEND:VCALENDAR",
                IcalEventOptions::new().method("REQUEST"),
            );

        let email = transport().build_message(message.node()).await.unwrap();
        let raw = formatted(&email);

        assert!(raw.contains("X-Campaign: spring"));
        assert!(raw.contains("List-Help: <mailto:admin@example.com?subject=help>"));
        assert!(raw.contains("X-Priority: 1 (Highest)"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("data.csv"));
        assert!(raw.contains("method=REQUEST"));
        assert_eq!(email.envelope().to().len(), 2);
    }

    #[tokio::test]
    async fn test_message_without_body_is_rejected() {
        let mut message = MailMessage::new();
        message.from("sender@example.com").to("user@example.com");

        let err = transport().build_message(message.node()).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_invalid_address_is_configuration_error() {
        let mut message = MailMessage::new();
        message.from("not an address").to("user@example.com").text("x");

        let err = transport().build_message(message.node()).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Configuration);
        assert!(err.message.contains("not an address"));
    }

    #[test]
    fn test_smtp_config_from_env() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("smtp.example.com")),
                ("SMTP_PORT", Some("2525")),
                ("SMTP_USERNAME", Some("user")),
                ("SMTP_PASSWORD", Some("secret")),
                ("SMTP_USE_TLS", Some("false")),
                ("SMTP_TIMEOUT", None),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.host, "smtp.example.com");
                assert_eq!(config.port, 2525);
                assert_eq!(config.username, "user");
                assert!(!config.use_tls);
                assert_eq!(config.timeout, 10);
            },
        );
    }

    #[test]
    fn test_smtp_config_without_credentials() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", Some("localhost")),
                ("SMTP_PORT", None),
                ("SMTP_USERNAME", None),
                ("SMTP_PASSWORD", None),
                ("SMTP_USE_TLS", None),
                ("SMTP_TIMEOUT", None),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.port, 587);
                assert!(config.username.is_empty());
                assert!(config.password.is_empty());
                assert!(config.use_tls);
            },
        );
    }

    #[test]
    fn test_smtp_config_requires_host() {
        temp_env::with_var_unset("SMTP_HOST", || {
            let err = SmtpConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("SMTP_HOST"));
        });
    }

    #[test]
    fn test_list_header_formatting() {
        assert_eq!(list_header_name("unsubscribe"), "List-Unsubscribe");
        assert_eq!(
            list_header_value(&[
                ListHeader {
                    url: "https://example.com/u".to_string(),
                    comment: Some("Unsubscribe".to_string()),
                },
                ListHeader {
                    url: "admin@example.com".to_string(),
                    comment: None,
                },
            ]),
            "<https://example.com/u> (Unsubscribe), <mailto:admin@example.com>"
        );
    }
}
