//! SMTP configuration for account notifications.
//!
//! # Environment Variables
//!
//! - `SMTP_ENABLED`: `true`/`1` to deliver over SMTP; otherwise mails are logged (default: false)
//! - `SMTP_HOST` (default: `localhost`), `SMTP_PORT` (default: 1025)
//! - `SMTP_USERNAME`, `SMTP_PASSWORD`: relay credentials, empty for an open relay
//! - `FROM_EMAIL`, `FROM_NAME`: sender mailbox
//! - `FRONTEND_URL`: base URL used to build confirmation links

use std::env;

use crate::env_parse;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
    pub frontend_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 1025,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_email: "noreply@schoolhouse.local".to_string(),
            from_name: "Schoolhouse".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

impl EmailConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::var("SMTP_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.enabled),
            smtp_host: env::var("SMTP_HOST").unwrap_or(defaults.smtp_host),
            smtp_port: env_parse("SMTP_PORT", defaults.smtp_port),
            smtp_username: env::var("SMTP_USERNAME").unwrap_or(defaults.smtp_username),
            smtp_password: env::var("SMTP_PASSWORD").unwrap_or(defaults.smtp_password),
            from_email: env::var("FROM_EMAIL").unwrap_or(defaults.from_email),
            from_name: env::var("FROM_NAME").unwrap_or(defaults.from_name),
            frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
        }
    }

    /// `Name <address>` header value for outgoing mail.
    pub fn sender(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    pub fn uses_credentials(&self) -> bool {
        !self.smtp_username.is_empty()
    }

    pub fn confirmation_url(&self, token: &str) -> String {
        format!(
            "{}/users/confirmation?confirmation_token={}",
            self.frontend_url.trim_end_matches('/'),
            token
        )
    }
}
