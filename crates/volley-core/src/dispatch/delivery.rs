//! Delivery executor - formats and transmits one message to one receiver
//!
//! The executor has no data-model side effects; marking receivers and
//! consuming quota is the caller's responsibility.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use volley_common::config::SmtpConfig;
use volley_common::types::EmailAddress;
use volley_storage::models::{Receiver, SenderAccount, Template};

use crate::credentials::CredentialCodec;

/// A fully personalized message ready for the transport
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub plain_body: Option<String>,
    /// Plaintext credential for the sending account, decrypted just before
    /// transmission and dropped with this value.
    pub credential: String,
}

/// Transport abstraction over the actual wire protocol
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()>;
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Transport failed; carries the stringified cause, never the raw error
    TransportError(String),
}

/// SMTP transport via lettre
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_message(email: &OutboundEmail) -> anyhow::Result<Message> {
        let from: Mailbox = email.from.parse()?;
        let to: Mailbox = email.to.parse()?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject);

        let message = match &email.plain_body {
            Some(plain) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(plain.clone()))
                    .singlepart(SinglePart::html(email.html_body.clone())),
            )?,
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone())?,
        };

        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        let message = Self::build_message(email)?;

        let transport = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
        };

        let mailer = transport
            .port(self.config.port)
            .credentials(Credentials::new(
                email.from.clone(),
                email.credential.clone(),
            ))
            .timeout(Some(Duration::from_secs(self.config.timeout_secs)))
            .build();

        let response = mailer.send(message).await?;
        debug!(to = %email.to, code = %response.code(), "Message accepted by relay");
        Ok(())
    }
}

/// Delivery executor - personalizes the template and hands the message to
/// the transport, classifying the outcome
pub struct DeliveryExecutor {
    mailer: Arc<dyn Mailer>,
    codec: CredentialCodec,
}

impl DeliveryExecutor {
    pub fn new(mailer: Arc<dyn Mailer>, codec: CredentialCodec) -> Self {
        Self { mailer, codec }
    }

    /// Send one message to one receiver via one sender account.
    ///
    /// Every failure along the way, including a credential that will not
    /// decrypt, is reported as a `TransportError` with the stringified
    /// cause; nothing is propagated raw.
    pub async fn deliver(
        &self,
        receiver: &Receiver,
        template: &Template,
        sender: &SenderAccount,
    ) -> DeliveryOutcome {
        let credential = match self.codec.decode(&sender.password_encrypted) {
            Ok(c) => c,
            Err(e) => return DeliveryOutcome::TransportError(e.to_string()),
        };

        let name = display_name(&receiver.address);
        let email = OutboundEmail {
            from: sender.address.clone(),
            to: receiver.address.clone(),
            subject: template.subject.clone(),
            html_body: personalize(&template.html_body, &name),
            plain_body: template.plain_body.as_deref().map(|b| personalize(b, &name)),
            credential,
        };

        match self.mailer.send(&email).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::TransportError(e.to_string()),
        }
    }
}

/// Substitute the name placeholder into a template body
fn personalize(body: &str, name: &str) -> String {
    body.replace("{name}", name)
}

/// Greeting name derived from the local part of the receiver address
fn display_name(address: &str) -> String {
    EmailAddress::parse(address)
        .map(|a| a.local)
        .unwrap_or_else(|| address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    pub(crate) fn test_codec() -> CredentialCodec {
        CredentialCodec::new(&STANDARD.encode([3u8; 32])).unwrap()
    }

    fn test_receiver(address: &str) -> Receiver {
        Receiver {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            address: address.to_string(),
            status: "pending".to_string(),
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    fn test_template() -> Template {
        Template {
            id: Uuid::new_v4(),
            name: "welcome".to_string(),
            subject: "Welcome aboard".to_string(),
            html_body: "<p>Hello {name}!</p>".to_string(),
            plain_body: Some("Hello {name}!".to_string()),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn test_sender(codec: &CredentialCodec) -> SenderAccount {
        SenderAccount {
            id: Uuid::new_v4(),
            address: "out@example.com".to_string(),
            password_encrypted: codec.encode("hunter2").unwrap(),
            sent_count: 0,
            sending_limit: 100,
            created_at: Utc::now(),
        }
    }

    /// Records every message it is handed
    struct RecordingMailer {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
            self.sent.lock().await.push(email.clone());
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _email: &OutboundEmail) -> anyhow::Result<()> {
            anyhow::bail!("451 4.3.0 temporary lookup failure")
        }
    }

    #[test]
    fn test_personalize_uses_local_part() {
        assert_eq!(display_name("jane.doe@example.com"), "jane.doe");
        assert_eq!(personalize("Hi {name}!", "jane.doe"), "Hi jane.doe!");
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        assert_eq!(display_name("not-an-address"), "not-an-address");
    }

    #[tokio::test]
    async fn test_deliver_builds_personalized_message() {
        let codec = test_codec();
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
        });
        let executor = DeliveryExecutor::new(mailer.clone(), codec.clone());

        let outcome = executor
            .deliver(
                &test_receiver("jane@example.com"),
                &test_template(),
                &test_sender(&codec),
            )
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "out@example.com");
        assert_eq!(sent[0].to, "jane@example.com");
        assert_eq!(sent[0].html_body, "<p>Hello jane!</p>");
        assert_eq!(sent[0].plain_body.as_deref(), Some("Hello jane!"));
        assert_eq!(sent[0].credential, "hunter2");
    }

    #[tokio::test]
    async fn test_transport_error_is_captured() {
        let codec = test_codec();
        let executor = DeliveryExecutor::new(Arc::new(FailingMailer), codec.clone());

        let outcome = executor
            .deliver(
                &test_receiver("jane@example.com"),
                &test_template(),
                &test_sender(&codec),
            )
            .await;

        match outcome {
            DeliveryOutcome::TransportError(reason) => {
                assert!(reason.contains("451"));
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecryptable_credential_is_transport_error() {
        let codec = test_codec();
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
        });
        let executor = DeliveryExecutor::new(mailer.clone(), codec.clone());

        let mut sender = test_sender(&codec);
        sender.password_encrypted = "garbage".to_string();

        let outcome = executor
            .deliver(&test_receiver("jane@example.com"), &test_template(), &sender)
            .await;

        assert!(matches!(outcome, DeliveryOutcome::TransportError(_)));
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[test]
    fn test_html_only_message_builds() {
        let email = OutboundEmail {
            from: "out@example.com".to_string(),
            to: "in@example.com".to_string(),
            subject: "Hi".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            plain_body: None,
            credential: "x".to_string(),
        };
        assert!(SmtpMailer::build_message(&email).is_ok());
    }
}
