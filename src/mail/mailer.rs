use async_trait::async_trait;
use lettre::message::{MultiPart, SinglePart, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use schoolhouse_config::EmailConfig;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("failed to send message: {0}")]
    Transport(String),
}

/// Everything needed to render an account confirmation mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationMessage {
    pub to_email: String,
    pub to_name: String,
    pub confirmation_url: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, html_body, text_body))]
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), MailError> {
        let email = Message::builder()
            .from(
                self.config
                    .sender()
                    .parse()
                    .map_err(|e| MailError::Address(format!("from: {}", e)))?,
            )
            .to(to_email
                .parse()
                .map_err(|e| MailError::Address(format!("to: {}", e)))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| MailError::Build(e.to_string()))?;

        let mailer = if self.config.uses_credentials() {
            let creds = Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            );

            SmtpTransport::relay(&self.config.smtp_host)
                .map_err(|e| MailError::Transport(format!("relay: {}", e)))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build()
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
                .port(self.config.smtp_port)
                .build()
        };

        // lettre's SMTP transport is blocking
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| MailError::Transport(format!("task join error: {}", e)))?
            .map_err(|e| MailError::Transport(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError> {
        let text_body = confirmation_text(&message.to_name, &message.confirmation_url);
        let html_body = confirmation_html(&message.to_name, &message.confirmation_url);
        self.send_email(
            &message.to_email,
            "Confirmation instructions",
            &text_body,
            &html_body,
        )
        .await
    }
}

/// Used when SMTP is disabled: the link is written to the log instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError> {
        info!(
            to = %message.to_email,
            url = %message.confirmation_url,
            "SMTP disabled, confirmation mail not sent"
        );
        Ok(())
    }
}

fn confirmation_text(name: &str, url: &str) -> String {
    format!(
        "Welcome {},\n\n\
         You can confirm your account email through the link below:\n\
         {}\n\n\
         If you didn't create an account, please ignore this email.\n\n\
         Schoolhouse",
        name, url
    )
}

fn confirmation_html(name: &str, url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Confirmation instructions</title>
</head>
<body style="margin: 0; padding: 20px; font-family: Arial, sans-serif; background-color: #f4f4f4;">
    <table width="600" cellpadding="0" cellspacing="0" align="center" style="background-color: #ffffff; border-radius: 8px;">
        <tr>
            <td style="padding: 40px 30px;">
                <h2 style="margin: 0 0 20px 0; color: #333333;">Welcome {}</h2>
                <p style="color: #666666; font-size: 16px;">You can confirm your account email through the link below:</p>
                <p style="margin: 30px 0; text-align: center;">
                    <a href="{}" style="padding: 14px 40px; background-color: #2563EB; color: #ffffff; text-decoration: none; border-radius: 6px;">Confirm my account</a>
                </p>
                <p style="color: #666666; font-size: 14px; word-break: break-all;">{}</p>
            </td>
        </tr>
    </table>
</body>
</html>"#,
        name, url, url
    )
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::RecordingMailer;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::{ConfirmationMessage, MailError, Mailer};

    /// Captures delivered messages. Can be told to fail a number of
    /// attempts first to exercise retries.
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<ConfirmationMessage>>,
        failures_remaining: AtomicU32,
        attempts: AtomicU32,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(times: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(times),
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<ConfirmationMessage> {
            self.sent
                .lock()
                .map(|sent| sent.clone())
                .unwrap_or_default()
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_confirmation(&self, message: &ConfirmationMessage) -> Result<(), MailError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(MailError::Transport("connection refused".to_string()));
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(message.clone());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_include_link() {
        let url = "http://localhost:3000/users/confirmation?confirmation_token=abc";
        assert!(confirmation_text("Sam", url).contains(url));
        let html = confirmation_html("Sam", url);
        assert!(html.contains("Welcome Sam"));
        assert!(html.contains(&format!("href=\"{}\"", url)));
    }

    #[tokio::test]
    async fn test_recording_mailer_fails_then_succeeds() {
        let mailer = RecordingMailer::failing(1);
        let message = ConfirmationMessage {
            to_email: "sam@example.com".to_string(),
            to_name: "Sam".to_string(),
            confirmation_url: "http://x".to_string(),
        };
        assert!(mailer.send_confirmation(&message).await.is_err());
        assert!(mailer.send_confirmation(&message).await.is_ok());
        assert_eq!(mailer.attempts(), 2);
        assert_eq!(mailer.sent(), vec![message]);
    }

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        let message = ConfirmationMessage {
            to_email: "sam@example.com".to_string(),
            to_name: "Sam".to_string(),
            confirmation_url: "http://x".to_string(),
        };
        assert!(LogMailer.send_confirmation(&message).await.is_ok());
    }
}
