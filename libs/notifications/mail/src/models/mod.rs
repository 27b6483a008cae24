//! Wire data types.
//!
//! [`MessageNode`] is the plain shape handed to transports. Empty fields are
//! skipped when serialising, so the JSON form of a node only carries what the
//! caller actually set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A mailbox: address plus optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Equality that ignores the display name unless `expected` sets one.
    pub fn matches(&self, expected: &Address) -> bool {
        self.address == expected.address
            && match &expected.name {
                Some(name) => self.name.as_deref() == Some(name.as_str()),
                None => true,
            }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<&String> for Address {
    fn from(address: &String) -> Self {
        Self::new(address.clone())
    }
}

impl<A: Into<String>, N: Into<String>> From<(A, N)> for Address {
    fn from((address, name): (A, N)) -> Self {
        Self::with_name(address, name)
    }
}

/// Email priority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Urgent emails (password reset, OTP)
    High,
    /// Normal transactional emails
    #[default]
    Normal,
    /// Bulk/marketing emails
    Low,
}

/// Value of a custom header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderValue {
    /// Encoded by the transport
    Raw(String),
    /// Already encoded; transports must send it verbatim
    Prepared(String),
}

impl HeaderValue {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw(value) | Self::Prepared(value) => value,
        }
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::Prepared(_))
    }
}

/// One custom header, kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: HeaderValue,
}

/// Entry of a `List-*` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHeader {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// SMTP envelope overriding the addresses derived from the headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
}

/// Where the bytes of an attachment come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentSource {
    /// Read from disk by the transport
    Path(String),
    /// Inline bytes, base64 in the JSON form
    Content(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// File attached to (or embedded in) a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(flatten)]
    pub source: AttachmentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Content id referenced from HTML as `cid:<id>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
}

/// Calendar invite representation. Exactly one source is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IcalSource {
    Content(String),
    Path(String),
    Href(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcalEvent {
    #[serde(flatten)]
    pub source: IcalSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// The plain data shape handed to a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply_to: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    /// `List-*` headers keyed by list type (`help`, `unsubscribe`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub list: BTreeMap<String, Vec<ListHeader>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ical_event: Option<IcalEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Apple Watch specific HTML part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<String>,
}

impl MessageNode {
    /// Look up a custom header by case-insensitive key.
    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|header| header.key.eq_ignore_ascii_case(key))
            .map(|header| &header.value)
    }

    /// Inline content for the given kind.
    pub fn content(&self, kind: ContentKind) -> Option<&str> {
        match kind {
            ContentKind::Html => self.html.as_deref(),
            ContentKind::Text => self.text.as_deref(),
            ContentKind::Watch => self.watch.as_deref(),
        }
    }

    pub(crate) fn content_mut(&mut self, kind: ContentKind) -> &mut Option<String> {
        match kind {
            ContentKind::Html => &mut self.html,
            ContentKind::Text => &mut self.text,
            ContentKind::Watch => &mut self.watch,
        }
    }

    /// Every recipient address across `to`, `cc` and `bcc`.
    pub fn recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// JSON form used by the subset matcher.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Kinds of body content a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Html,
    Text,
    Watch,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [ContentKind::Html, ContentKind::Text, ContentKind::Watch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Text => "text",
            Self::Watch => "watch",
        }
    }
}

/// Deferred template reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub template: String,
    #[serde(default)]
    pub data: Value,
}

/// Pending views, rendered at compile time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentViews {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<View>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<View>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<View>,
}

impl ContentViews {
    pub fn get(&self, kind: ContentKind) -> Option<&View> {
        match kind {
            ContentKind::Html => self.html.as_ref(),
            ContentKind::Text => self.text.as_ref(),
            ContentKind::Watch => self.watch.as_ref(),
        }
    }

    pub(crate) fn set(&mut self, kind: ContentKind, view: View) {
        match kind {
            ContentKind::Html => self.html = Some(view),
            ContentKind::Text => self.text = Some(view),
            ContentKind::Watch => self.watch = Some(view),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.text.is_none() && self.watch.is_none()
    }
}

/// A finalised message paired with the views it was compiled from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledMail {
    pub message: MessageNode,
    #[serde(default)]
    pub views: ContentViews,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
