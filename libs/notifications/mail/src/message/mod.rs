//! Message builder.
//!
//! A [`Message`] accumulates a [`MessageNode`] plus pending template views.
//! Views are not rendered until [`Message::compute_contents`] runs, so inline
//! content set later still wins and the template engine is chosen by the
//! mailer rather than by the message.

mod assertions;

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{MailError, MailResult};
use crate::models::{
    Address, Attachment, AttachmentSource, CompiledMail, ContentKind, ContentViews, Envelope,
    Header, HeaderValue, IcalEvent, IcalSource, ListHeader, MessageNode, Priority, View,
};
use crate::templates::TemplateEngine;

/// Options shared by `attach*` and `embed*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentOptions {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl AttachmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }
}

/// Options shared by the `ical_event*` setters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcalEventOptions {
    pub method: Option<String>,
    pub filename: Option<String>,
}

impl IcalEventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Mutable builder for one outgoing email.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    node: MessageNode,
    views: ContentViews,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a message from a compiled snapshot.
    pub fn from_compiled(mail: CompiledMail) -> Self {
        Self {
            node: mail.message,
            views: mail.views,
        }
    }

    /// The wire node as built so far.
    pub fn node(&self) -> &MessageNode {
        &self.node
    }

    /// Pending template views.
    pub fn views(&self) -> &ContentViews {
        &self.views
    }

    // -------------------------------------------------------------------------
    // Addresses
    // -------------------------------------------------------------------------

    /// Set the sender
    pub fn from(&mut self, address: impl Into<Address>) -> &mut Self {
        self.node.from = Some(address.into());
        self
    }

    /// Add a primary recipient
    pub fn to(&mut self, address: impl Into<Address>) -> &mut Self {
        self.node.to.push(address.into());
        self
    }

    /// Add a CC recipient
    pub fn cc(&mut self, address: impl Into<Address>) -> &mut Self {
        self.node.cc.push(address.into());
        self
    }

    /// Add a BCC recipient
    pub fn bcc(&mut self, address: impl Into<Address>) -> &mut Self {
        self.node.bcc.push(address.into());
        self
    }

    /// Add a reply-to address
    pub fn reply_to(&mut self, address: impl Into<Address>) -> &mut Self {
        self.node.reply_to.push(address.into());
        self
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    pub fn subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.node.subject = Some(subject.into());
        self
    }

    pub fn message_id(&mut self, message_id: impl Into<String>) -> &mut Self {
        self.node.message_id = Some(message_id.into());
        self
    }

    pub fn in_reply_to(&mut self, message_id: impl Into<String>) -> &mut Self {
        self.node.in_reply_to = Some(message_id.into());
        self
    }

    /// Append message ids to the `References` header
    pub fn references<I, S>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.references.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn envelope(&mut self, envelope: Envelope) -> &mut Self {
        self.node.envelope = Some(envelope);
        self
    }

    /// Transfer encoding for text parts (`quoted-printable`, `base64`, ...)
    pub fn encoding(&mut self, encoding: impl Into<String>) -> &mut Self {
        self.node.encoding = Some(encoding.into());
        self
    }

    pub fn priority(&mut self, priority: Priority) -> &mut Self {
        self.node.priority = Some(priority);
        self
    }

    // -------------------------------------------------------------------------
    // Headers
    // -------------------------------------------------------------------------

    /// Set a header that the transport encodes. Replaces an existing value
    /// for the same key in place.
    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set_header(key.into(), HeaderValue::Raw(value.into()))
    }

    /// Set a pre-encoded header that the transport must send verbatim.
    pub fn prepared_header(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.set_header(key.into(), HeaderValue::Prepared(value.into()))
    }

    fn set_header(&mut self, key: String, value: HeaderValue) -> &mut Self {
        match self
            .node
            .headers
            .iter_mut()
            .find(|header| header.key.eq_ignore_ascii_case(&key))
        {
            Some(existing) => existing.value = value,
            None => self.node.headers.push(Header { key, value }),
        }
        self
    }

    /// Add an entry to a `List-<name>` header
    pub fn add_list_header(
        &mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        comment: Option<&str>,
    ) -> &mut Self {
        self.node
            .list
            .entry(name.into().to_ascii_lowercase())
            .or_default()
            .push(ListHeader {
                url: url.into(),
                comment: comment.map(str::to_string),
            });
        self
    }

    pub fn list_help(&mut self, url: impl Into<String>) -> &mut Self {
        self.add_list_header("help", url, None)
    }

    pub fn list_unsubscribe(&mut self, url: impl Into<String>, comment: Option<&str>) -> &mut Self {
        self.add_list_header("unsubscribe", url, comment)
    }

    pub fn list_subscribe(&mut self, url: impl Into<String>, comment: Option<&str>) -> &mut Self {
        self.add_list_header("subscribe", url, comment)
    }

    pub fn list_post(&mut self, url: impl Into<String>) -> &mut Self {
        self.add_list_header("post", url, None)
    }

    pub fn list_owner(&mut self, url: impl Into<String>) -> &mut Self {
        self.add_list_header("owner", url, None)
    }

    pub fn list_archive(&mut self, url: impl Into<String>) -> &mut Self {
        self.add_list_header("archive", url, None)
    }

    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------

    /// Inline HTML. Takes precedence over `html_view`.
    pub fn html(&mut self, content: impl Into<String>) -> &mut Self {
        self.node.html = Some(content.into());
        self
    }

    /// Inline plain text. Takes precedence over `text_view`.
    pub fn text(&mut self, content: impl Into<String>) -> &mut Self {
        self.node.text = Some(content.into());
        self
    }

    /// Inline Apple Watch HTML. Takes precedence over `watch_view`.
    pub fn watch(&mut self, content: impl Into<String>) -> &mut Self {
        self.node.watch = Some(content.into());
        self
    }

    /// Defer the HTML body to a template rendered at send time
    pub fn html_view(&mut self, template: impl Into<String>, data: Value) -> &mut Self {
        self.set_view(ContentKind::Html, template.into(), data)
    }

    /// Defer the plain-text body to a template rendered at send time
    pub fn text_view(&mut self, template: impl Into<String>, data: Value) -> &mut Self {
        self.set_view(ContentKind::Text, template.into(), data)
    }

    /// Defer the watch body to a template rendered at send time
    pub fn watch_view(&mut self, template: impl Into<String>, data: Value) -> &mut Self {
        self.set_view(ContentKind::Watch, template.into(), data)
    }

    fn set_view(&mut self, kind: ContentKind, template: String, data: Value) -> &mut Self {
        self.views.set(kind, View { template, data });
        self
    }

    // -------------------------------------------------------------------------
    // Attachments
    // -------------------------------------------------------------------------

    /// Attach a file read by the transport at send time
    pub fn attach(&mut self, path: impl AsRef<Path>, options: AttachmentOptions) -> &mut Self {
        let attachment = Self::path_attachment(path.as_ref(), options, None);
        self.node.attachments.push(attachment);
        self
    }

    /// Attach in-memory bytes
    pub fn attach_data(
        &mut self,
        content: impl Into<Vec<u8>>,
        options: AttachmentOptions,
    ) -> &mut Self {
        let attachment = Self::data_attachment(content.into(), options, None);
        self.node.attachments.push(attachment);
        self
    }

    /// Embed a file so HTML can reference it as `cid:<cid>`
    pub fn embed(
        &mut self,
        path: impl AsRef<Path>,
        cid: impl Into<String>,
        options: AttachmentOptions,
    ) -> &mut Self {
        let attachment = Self::path_attachment(path.as_ref(), options, Some(cid.into()));
        self.node.attachments.push(attachment);
        self
    }

    /// Embed in-memory bytes so HTML can reference them as `cid:<cid>`
    pub fn embed_data(
        &mut self,
        content: impl Into<Vec<u8>>,
        cid: impl Into<String>,
        options: AttachmentOptions,
    ) -> &mut Self {
        let attachment = Self::data_attachment(content.into(), options, Some(cid.into()));
        self.node.attachments.push(attachment);
        self
    }

    fn path_attachment(path: &Path, options: AttachmentOptions, cid: Option<String>) -> Attachment {
        let filename = options.filename.or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        });

        Attachment {
            source: AttachmentSource::Path(path.to_string_lossy().into_owned()),
            filename,
            cid,
            content_type: options.content_type,
            content_disposition: options.content_disposition,
        }
    }

    fn data_attachment(
        content: Vec<u8>,
        options: AttachmentOptions,
        cid: Option<String>,
    ) -> Attachment {
        Attachment {
            source: AttachmentSource::Content(content),
            filename: options.filename,
            cid,
            content_type: options.content_type,
            content_disposition: options.content_disposition,
        }
    }

    // -------------------------------------------------------------------------
    // Calendar events
    // -------------------------------------------------------------------------

    /// Attach an iCalendar invite from its text
    pub fn ical_event(
        &mut self,
        content: impl Into<String>,
        options: IcalEventOptions,
    ) -> &mut Self {
        self.set_ical(IcalSource::Content(content.into()), options)
    }

    /// Attach an iCalendar invite read from disk by the transport
    pub fn ical_event_from_file(
        &mut self,
        path: impl AsRef<Path>,
        options: IcalEventOptions,
    ) -> &mut Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.set_ical(IcalSource::Path(path), options)
    }

    /// Attach an iCalendar invite fetched from a URL by the transport
    pub fn ical_event_from_url(
        &mut self,
        url: impl Into<String>,
        options: IcalEventOptions,
    ) -> &mut Self {
        self.set_ical(IcalSource::Href(url.into()), options)
    }

    fn set_ical(&mut self, source: IcalSource, options: IcalEventOptions) -> &mut Self {
        self.node.ical_event = Some(IcalEvent {
            source,
            method: options.method,
            filename: options.filename,
        });
        self
    }

    // -------------------------------------------------------------------------
    // Compilation
    // -------------------------------------------------------------------------

    /// Render pending views whose inline content is still unset.
    ///
    /// Running it again is a no-op once the content is in place.
    pub async fn compute_contents(
        &mut self,
        engine: Option<&dyn TemplateEngine>,
    ) -> MailResult<()> {
        if self.views.is_empty() {
            return Ok(());
        }

        let engine = engine.ok_or(MailError::MissingTemplateEngine)?;

        for kind in ContentKind::ALL {
            let Some(view) = self.views.get(kind) else {
                continue;
            };

            if self.node.content(kind).is_some() {
                continue;
            }

            debug!(template = %view.template, content = kind.as_str(), "Rendering view");

            let rendered = engine
                .render(&view.template, &view.data)
                .await
                .map_err(|e| MailError::Render {
                    template: view.template.clone(),
                    message: e.to_string(),
                })?;

            *self.node.content_mut(kind) = Some(rendered);
        }

        Ok(())
    }

    /// Snapshot of the message and its views.
    pub fn to_compiled(&self) -> CompiledMail {
        CompiledMail {
            message: self.node.clone(),
            views: self.views.clone(),
        }
    }

    pub fn into_compiled(self) -> CompiledMail {
        CompiledMail {
            message: self.node,
            views: self.views,
        }
    }

    /// JSON form `{ "message": .., "views": .. }`.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.to_compiled()).unwrap_or(Value::Null)
    }

    pub(crate) fn node_mut(&mut self) -> &mut MessageNode {
        &mut self.node
    }
}
