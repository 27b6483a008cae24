//! Integration tests for the mail library

use std::sync::Arc;

use async_trait::async_trait;
use mail::{
    Address, FakeTransport, HandlebarsEngine, JsonTransport, Mail, MailConfig, MailError,
    MailManager, MailResult, MailerConfig, MemoryQueueMessenger, Message, Messenger, Priority,
    SendResult,
};
use serde_json::json;
use tokio::sync::mpsc;

/// Manager with a `real` default mailer and a `custom` mailer, each backed by
/// its own capturing transport.
fn manager(real: &FakeTransport, custom: &FakeTransport) -> MailManager {
    let real = real.clone();
    let custom = custom.clone();

    MailManager::builder()
        .default_mailer("real")
        .mailer("real", move || Ok(real.clone()))
        .mailer("custom", move || Ok(custom.clone()))
        .build()
}

struct VerifyEmail {
    email: String,
}

#[async_trait]
impl Mail for VerifyEmail {
    fn subject(&self) -> Option<String> {
        Some("Verify your email".to_string())
    }

    async fn prepare(&self, message: &mut Message) -> MailResult<()> {
        message
            .from("accounts@example.com")
            .to(self.email.as_str())
            .text(format!("Verify {}", self.email));
        Ok(())
    }
}

struct PasswordChanged;

#[async_trait]
impl Mail for PasswordChanged {
    async fn prepare(&self, message: &mut Message) -> MailResult<()> {
        message
            .from("accounts@example.com")
            .to("user@example.com")
            .subject("Password changed")
            .text("Your password was changed")
            .priority(Priority::High);
        Ok(())
    }
}

mod mailer_tests {
    use super::*;

    #[tokio::test]
    async fn test_custom_mailer_receives_exact_wire_node() {
        let real = FakeTransport::new();
        let custom = FakeTransport::new();
        let manager = manager(&real, &custom);

        manager
            .mailer("custom")
            .unwrap()
            .send(|message| {
                message
                    .to("foo@bar.com")
                    .from("baz@bar.com")
                    .subject("Hello world");
            })
            .await
            .unwrap();

        let sent = custom.last_sent().unwrap();
        assert_eq!(
            sent.to_value(),
            json!({
                "to": [{ "address": "foo@bar.com" }],
                "from": { "address": "baz@bar.com" },
                "subject": "Hello world"
            })
        );
        assert_eq!(real.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_global_from_applies_to_every_mailer() {
        let transport = FakeTransport::new();
        let handle = transport.clone();

        let manager = MailManager::builder()
            .config(MailConfig {
                default_mailer: Some("smtp".to_string()),
                mailer: MailerConfig::new().with_from(("noreply@example.com", "Example")),
                ..Default::default()
            })
            .mailer("smtp", move || Ok(handle.clone()))
            .build();

        manager
            .send(|message| {
                message.to("user@example.com").subject("Defaults").text("x");
            })
            .await
            .unwrap();

        let sent = transport.last_sent().unwrap();
        assert_eq!(sent.from, Some(Address::with_name("noreply@example.com", "Example")));
    }

    #[tokio::test]
    async fn test_views_rendered_through_manager_engine() {
        let transport = FakeTransport::new();
        let handle = transport.clone();

        let engine = HandlebarsEngine::new();
        engine
            .register("emails/welcome", "<h1>Welcome, {{name}}!</h1>")
            .unwrap();
        engine.register("emails/welcome_text", "Welcome, {{name}}!").unwrap();

        let manager = MailManager::builder()
            .default_mailer("smtp")
            .mailer("smtp", move || Ok(handle.clone()))
            .template_engine(engine)
            .build();

        manager
            .send(|message| {
                message
                    .to("user@example.com")
                    .html_view("emails/welcome", json!({ "name": "Ada" }))
                    .text_view("emails/welcome_text", json!({ "name": "Ada" }))
                    .text("Inline text wins");
            })
            .await
            .unwrap();

        let sent = transport.last_sent().unwrap();
        assert_eq!(sent.html.as_deref(), Some("<h1>Welcome, Ada!</h1>"));
        assert_eq!(sent.text.as_deref(), Some("Inline text wins"));
    }

    #[tokio::test]
    async fn test_json_transport_preview() {
        let manager = MailManager::builder()
            .default_mailer("preview")
            .mailer("preview", || Ok(JsonTransport::new()))
            .build();

        let response = manager
            .send(|message| {
                message
                    .from("app@example.com")
                    .to("user@example.com")
                    .subject("Preview")
                    .html("<p>Hi</p>");
            })
            .await
            .unwrap();

        let body: serde_json::Value =
            serde_json::from_str(response.original["message"].as_str().unwrap()).unwrap();
        assert_eq!(body["subject"], "Preview");
        assert_eq!(response.envelope.unwrap().to, vec!["user@example.com"]);
    }

    #[tokio::test]
    async fn test_unknown_mailer_fails_fast() {
        let manager = manager(&FakeTransport::new(), &FakeTransport::new());

        let err = manager.mailer("mailgun").unwrap_err();
        assert!(matches!(err, MailError::UnknownMailer(_)));
        assert!(err.is_configuration());
    }
}

mod queue_tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_mail_reaches_monitor() {
        let transport = FakeTransport::new();
        let handle = transport.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<SendResult, String>>();

        let manager = MailManager::builder()
            .default_mailer("smtp")
            .mailer("smtp", move || Ok(handle.clone()))
            .messenger(move |mailer| {
                let tx = tx.clone();
                Arc::new(MemoryQueueMessenger::new(mailer).monitor(move |result| {
                    let _ = tx.send(result.map_err(|e| e.to_string()));
                })) as Arc<dyn Messenger>
            })
            .build();
        let mut events = manager.subscribe();

        manager
            .send_later(|message| {
                message
                    .from("app@example.com")
                    .to("user@example.com")
                    .subject("Queued")
                    .text("Later");
            })
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap().name(), "mail:queueing");
        assert_eq!(events.recv().await.unwrap().name(), "mail:queued");

        let response = rx.recv().await.unwrap().unwrap();
        assert!(response.message_id.starts_with("fake-"));
        assert_eq!(transport.last_sent().unwrap().subject.as_deref(), Some("Queued"));

        assert_eq!(events.recv().await.unwrap().name(), "mail:sending");
        let sent = events.recv().await.unwrap();
        assert_eq!(sent.name(), "mail:sent");
        assert_eq!(sent.packet().response.as_ref(), Some(&response));
    }

    #[tokio::test]
    async fn test_queued_failure_is_not_returned_to_caller() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let manager = MailManager::builder()
            .default_mailer("smtp")
            .mailer("smtp", || Ok(FakeTransport::failing("Connection refused")))
            .messenger(move |mailer| {
                let tx = tx.clone();
                Arc::new(MemoryQueueMessenger::new(mailer).monitor(move |result| {
                    let _ = tx.send(result);
                })) as Arc<dyn Messenger>
            })
            .build();

        manager.send_mail_later(PasswordChanged).await.unwrap();

        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.mail.message.subject.as_deref(), Some("Password changed"));
        assert!(err.to_string().contains("Connection refused"));
    }
}

mod fake_tests {
    use super::*;

    #[tokio::test]
    async fn test_mails_count_by_type() {
        let manager = manager(&FakeTransport::new(), &FakeTransport::new());
        let fake = manager.fake().await;

        manager
            .send_mail(VerifyEmail {
                email: "a@example.com".to_string(),
            })
            .await
            .unwrap();
        manager
            .send_mail(VerifyEmail {
                email: "b@example.com".to_string(),
            })
            .await
            .unwrap();
        manager.send_mail(PasswordChanged).await.unwrap();

        fake.mails().assert_sent_count_of::<VerifyEmail>(2).unwrap();
        fake.mails().assert_sent_count(3).unwrap();

        let failure = fake
            .mails()
            .assert_sent_count_of::<VerifyEmail>(1)
            .unwrap_err();
        assert!(failure.message.contains('1'));
        assert!(failure.message.contains('2'));

        fake.mails()
            .assert_sent_where::<VerifyEmail, _>(|mail| mail.mail().email == "b@example.com")
            .unwrap();
        fake.mails().assert_not_queued::<VerifyEmail>().unwrap();

        let verifications = fake.mails().sent::<VerifyEmail>();
        verifications[0]
            .message()
            .assert_subject("Verify your email")
            .unwrap();
        verifications[0].message().assert_to("a@example.com").unwrap();
    }

    #[tokio::test]
    async fn test_messages_subset_search() {
        let real = FakeTransport::new();
        let manager = manager(&real, &FakeTransport::new());
        let fake = manager.fake().await;

        manager
            .send(|message| {
                message
                    .from("app@example.com")
                    .to(("ada@example.com", "Ada"))
                    .subject("Invoice")
                    .html("<p>Total: 10</p>")
                    .header("X-Invoice", "42");
            })
            .await
            .unwrap();

        fake.messages().assert_sent(json!({ "subject": "Invoice" })).unwrap();
        fake.messages()
            .assert_sent(json!({ "to": [{ "address": "ada@example.com" }] }))
            .unwrap();
        fake.messages().assert_not_sent(json!({ "subject": "Receipt" })).unwrap();

        let message = &fake.messages().sent()[0];
        message.assert_to("ada@example.com").unwrap();
        message.assert_to(("ada@example.com", "Ada")).unwrap();
        assert!(message.assert_to(("ada@example.com", "Grace")).is_err());
        message.assert_html_includes("Total: 10").unwrap();
        message.assert_header("X-Invoice", Some("42")).unwrap();

        assert!(fake.transport().find(json!({ "subject": "Invoice" })).is_some());
        assert!(fake.transport().find(json!({ "subject": "Missing" })).is_none());
        assert_eq!(real.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_send_later_in_fake_mode_is_captured_as_queued() {
        let manager = manager(&FakeTransport::new(), &FakeTransport::new());
        let fake = manager.fake().await;

        manager
            .send_later(|message| {
                message.to("user@example.com").subject("Digest").text("x");
            })
            .await
            .unwrap();

        fake.messages().assert_queued(json!({ "subject": "Digest" })).unwrap();
        fake.messages().assert_queued_count(1).unwrap();
        fake.messages().assert_none_sent().unwrap();
    }

    #[tokio::test]
    async fn test_restore_routes_back_to_real_transport() {
        let real = FakeTransport::new();
        let manager = manager(&real, &FakeTransport::new());
        let fake = manager.fake().await;

        manager.send_mail(PasswordChanged).await.unwrap();
        fake.mails().assert_sent::<PasswordChanged>().unwrap();

        manager.restore().await.unwrap();
        fake.mails().assert_none_sent().unwrap();

        manager.send_mail(PasswordChanged).await.unwrap();
        assert_eq!(real.sent_count(), 1);
        assert_eq!(real.last_sent().unwrap().priority, Some(Priority::High));
    }
}
