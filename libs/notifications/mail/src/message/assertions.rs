//! Assertion helpers used against captured messages in tests.

use super::Message;
use crate::error::AssertionFailure;
use crate::models::{Address, AttachmentSource, ContentKind, IcalSource, Priority};

type AssertResult = Result<(), AssertionFailure>;

fn list_addresses(addresses: &[Address]) -> String {
    if addresses.is_empty() {
        return "none".to_string();
    }

    addresses
        .iter()
        .map(Address::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Message {
    fn assert_address_in(
        &self,
        field: &str,
        actual: &[Address],
        expected: Address,
    ) -> AssertResult {
        if actual.iter().any(|address| address.matches(&expected)) {
            return Ok(());
        }

        Err(AssertionFailure::new(format!(
            "Expected message {field} to include \"{expected}\", got {}",
            list_addresses(actual)
        )))
    }

    /// Passes when the sender matches. The name is only compared when given.
    pub fn assert_from(&self, expected: impl Into<Address>) -> AssertResult {
        let expected = expected.into();
        match &self.node.from {
            Some(from) if from.matches(&expected) => Ok(()),
            Some(from) => Err(AssertionFailure::new(format!(
                "Expected message to be sent from \"{expected}\", got \"{from}\""
            ))),
            None => Err(AssertionFailure::new(format!(
                "Expected message to be sent from \"{expected}\", but no sender is set"
            ))),
        }
    }

    pub fn assert_to(&self, expected: impl Into<Address>) -> AssertResult {
        self.assert_address_in("to", &self.node.to, expected.into())
    }

    pub fn assert_cc(&self, expected: impl Into<Address>) -> AssertResult {
        self.assert_address_in("cc", &self.node.cc, expected.into())
    }

    pub fn assert_bcc(&self, expected: impl Into<Address>) -> AssertResult {
        self.assert_address_in("bcc", &self.node.bcc, expected.into())
    }

    pub fn assert_reply_to(&self, expected: impl Into<Address>) -> AssertResult {
        self.assert_address_in("reply_to", &self.node.reply_to, expected.into())
    }

    pub fn assert_subject(&self, expected: &str) -> AssertResult {
        match self.node.subject.as_deref() {
            Some(subject) if subject == expected => Ok(()),
            actual => Err(AssertionFailure::new(format!(
                "Expected message subject to be \"{expected}\", got {actual:?}"
            ))),
        }
    }

    fn assert_content_includes(&self, kind: ContentKind, substring: &str) -> AssertResult {
        match self.node.content(kind) {
            Some(content) if content.contains(substring) => Ok(()),
            Some(_) => Err(AssertionFailure::new(format!(
                "Expected message {} body to include \"{substring}\"",
                kind.as_str()
            ))),
            None => Err(AssertionFailure::new(format!(
                "Expected message {} body to include \"{substring}\", but it has no {} body",
                kind.as_str(),
                kind.as_str()
            ))),
        }
    }

    pub fn assert_html_includes(&self, substring: &str) -> AssertResult {
        self.assert_content_includes(ContentKind::Html, substring)
    }

    pub fn assert_text_includes(&self, substring: &str) -> AssertResult {
        self.assert_content_includes(ContentKind::Text, substring)
    }

    pub fn assert_watch_includes(&self, substring: &str) -> AssertResult {
        self.assert_content_includes(ContentKind::Watch, substring)
    }

    /// Passes when an attachment has the given filename, or was read from the
    /// given path.
    pub fn assert_attachment(&self, filename_or_path: &str) -> AssertResult {
        let found = self.node.attachments.iter().any(|attachment| {
            attachment.filename.as_deref() == Some(filename_or_path)
                || matches!(
                    &attachment.source,
                    AttachmentSource::Path(path) if path == filename_or_path
                )
        });

        if found {
            Ok(())
        } else {
            Err(AssertionFailure::new(format!(
                "Expected message attachments to include \"{filename_or_path}\""
            )))
        }
    }

    /// Passes when the header exists and, if given, has the expected value.
    pub fn assert_header(&self, key: &str, value: Option<&str>) -> AssertResult {
        match (self.node.header(key), value) {
            (None, _) => Err(AssertionFailure::new(format!(
                "Expected message headers to include \"{key}\""
            ))),
            (Some(actual), Some(expected)) if actual.as_str() != expected => {
                Err(AssertionFailure::new(format!(
                    "Expected message header \"{key}\" to be \"{expected}\", got \"{}\"",
                    actual.as_str()
                )))
            }
            (Some(_), _) => Ok(()),
        }
    }

    pub fn assert_no_header(&self, key: &str) -> AssertResult {
        match self.node.header(key) {
            Some(_) => Err(AssertionFailure::new(format!(
                "Expected message headers to not include \"{key}\""
            ))),
            None => Ok(()),
        }
    }

    pub fn assert_priority(&self, expected: Priority) -> AssertResult {
        match self.node.priority {
            Some(priority) if priority == expected => Ok(()),
            actual => Err(AssertionFailure::new(format!(
                "Expected message priority to be {expected:?}, got {actual:?}"
            ))),
        }
    }

    /// Passes when a calendar event is attached. `contains` is matched against
    /// inline content, file path or URL, whichever was used.
    pub fn assert_ical_event(&self, contains: Option<&str>) -> AssertResult {
        let Some(event) = &self.node.ical_event else {
            return Err(AssertionFailure::new(
                "Expected message to have a calendar event",
            ));
        };

        let Some(expected) = contains else {
            return Ok(());
        };

        let actual = match &event.source {
            IcalSource::Content(value) | IcalSource::Path(value) | IcalSource::Href(value) => value,
        };

        if actual.contains(expected) {
            Ok(())
        } else {
            Err(AssertionFailure::new(format!(
                "Expected message calendar event to include \"{expected}\""
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{AttachmentOptions, IcalEventOptions, Message};
    use crate::models::Priority;

    fn message() -> Message {
        let mut message = Message::new();
        message
            .from(("sender@example.com", "Sender"))
            .to(("foo@bar.com", "Foo"))
            .cc("cc@bar.com")
            .subject("Verify your email")
            .html("<a href=\"https://example.com/verify\">Verify</a>")
            .text("Open https://example.com/verify")
            .header("X-Campaign", "signup")
            .priority(Priority::High)
            .attach("/srv/files/terms.pdf", AttachmentOptions::new())
            .ical_event("BEGIN:VCALENDAR\nSUMMARY:Standup", IcalEventOptions::new());
        message
    }

    #[test]
    fn test_address_assertions_tolerate_missing_name() {
        let message = message();

        assert!(message.assert_to("foo@bar.com").is_ok());
        assert!(message.assert_to(("foo@bar.com", "Foo")).is_ok());
        assert!(message.assert_from("sender@example.com").is_ok());
        assert!(message.assert_cc("cc@bar.com").is_ok());

        let err = message.assert_to(("foo@bar.com", "Bar")).unwrap_err();
        assert!(err.message.contains("Bar <foo@bar.com>"));

        let err = message.assert_bcc("nobody@bar.com").unwrap_err();
        assert!(err.message.contains("nobody@bar.com"));
        assert!(err.message.contains("none"));
    }

    #[test]
    fn test_subject_and_content_assertions() {
        let message = message();

        assert!(message.assert_subject("Verify your email").is_ok());
        assert!(message.assert_html_includes("/verify").is_ok());
        assert!(message.assert_text_includes("https://example.com").is_ok());

        let err = message.assert_subject("Welcome").unwrap_err();
        assert!(err.message.contains("\"Welcome\""));

        let err = message.assert_watch_includes("x").unwrap_err();
        assert!(err.message.contains("no watch body"));
    }

    #[test]
    fn test_header_attachment_priority_assertions() {
        let message = message();

        assert!(message.assert_header("x-campaign", None).is_ok());
        assert!(message.assert_header("X-Campaign", Some("signup")).is_ok());
        assert!(message.assert_header("X-Campaign", Some("other")).is_err());
        assert!(message.assert_no_header("X-Missing").is_ok());
        assert!(message.assert_no_header("X-Campaign").is_err());

        assert!(message.assert_attachment("terms.pdf").is_ok());
        assert!(message.assert_attachment("/srv/files/terms.pdf").is_ok());
        assert!(message.assert_attachment("invoice.pdf").is_err());

        assert!(message.assert_priority(Priority::High).is_ok());
        assert!(message.assert_priority(Priority::Low).is_err());

        assert!(message.assert_ical_event(Some("SUMMARY:Standup")).is_ok());
        assert!(message.assert_ical_event(Some("SUMMARY:Retro")).is_err());
        assert!(Message::new().assert_ical_event(None).is_err());
    }
}
