//! Transactional email through the Gmail `messages.send` endpoint.
//!
//! Messages are assembled as minimal RFC 2822 text and sent base64url
//! encoded, authorized with the signed-in user's access token.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::client::REQUEST_TIMEOUT_SECS;
use super::ApiError;

pub const DEFAULT_GMAIL_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Plain-text email ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub to_name: Option<String>,
    /// Sender display name and address; Gmail uses the account address when absent
    pub from: Option<(String, String)>,
    pub subject: String,
    pub body: String,
}

/// Header values must not carry line breaks
fn header_safe(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// RFC 2047 encoded-word for non-ASCII header text
fn encode_header_text(value: &str) -> String {
    let value = header_safe(value);
    if value.is_ascii() {
        value
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
        )
    }
}

fn mailbox(name: Option<&str>, address: &str) -> String {
    let address = header_safe(address.trim());
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) if name.is_ascii() => format!("\"{}\" <{}>", header_safe(name).replace('"', ""), address),
        Some(name) => format!("{} <{}>", encode_header_text(name), address),
        None => address,
    }
}

impl EmailMessage {
    /// Render the message as RFC 2822 text with CRLF line endings
    pub fn to_mime(&self) -> String {
        let mut lines = vec![format!("To: {}", mailbox(self.to_name.as_deref(), &self.to))];
        if let Some((name, address)) = &self.from {
            lines.push(format!("From: {}", mailbox(Some(name), address)));
        }
        lines.push(format!("Subject: {}", encode_header_text(&self.subject)));
        lines.push("MIME-Version: 1.0".to_string());
        lines.push("Content-Type: text/plain; charset=UTF-8".to_string());
        lines.push("Content-Transfer-Encoding: 8bit".to_string());
        lines.push(String::new());
        lines.push(self.body.replace("\r\n", "\n").replace('\n', "\r\n"));
        lines.join("\r\n")
    }

    /// base64url payload for the `raw` field
    pub fn to_raw(&self) -> String {
        base64::engine::general_purpose::URL_SAFE.encode(self.to_mime().as_bytes())
    }
}

/// Anything that can deliver an [`EmailMessage`]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send one email and return the provider's message id
    async fn send_email(&self, email: &EmailMessage) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Clone)]
pub struct GmailClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GmailClient {
    pub fn new(token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, token))
    }

    /// Reuse an existing connection pool
    pub fn with_client(client: Client, token: String) -> Self {
        Self {
            client,
            base_url: DEFAULT_GMAIL_URL.to_string(),
            token,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmailTransport for GmailClient {
    async fn send_email(&self, email: &EmailMessage) -> Result<String> {
        let url = format!("{}/users/me/messages/send", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "raw": email.to_raw() }))
            .send()
            .await
            .context("Failed to send email request")?;

        let response = ApiError::check(response).await?;
        let sent: SendResponse = response.json().await.context("Failed to parse send response")?;
        debug!(message_id = %sent.id, "Email accepted");
        Ok(sent.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> EmailMessage {
        EmailMessage {
            to: "ruth@example.org".to_string(),
            to_name: Some("Ruth Moab".to_string()),
            from: Some(("Grace Church".to_string(), "office@grace.example".to_string())),
            subject: "Sunday potluck".to_string(),
            body: "Bring a dish.\nSee you there!".to_string(),
        }
    }

    #[test]
    fn test_to_mime_layout() {
        let mime = email().to_mime();
        let (headers, body) = mime.split_once("\r\n\r\n").unwrap();
        assert!(headers.starts_with("To: \"Ruth Moab\" <ruth@example.org>\r\n"));
        assert!(headers.contains("From: \"Grace Church\" <office@grace.example>"));
        assert!(headers.contains("Subject: Sunday potluck"));
        assert!(headers.contains("Content-Type: text/plain; charset=UTF-8"));
        assert_eq!(body, "Bring a dish.\r\nSee you there!");
    }

    #[test]
    fn test_header_injection_is_stripped() {
        let mut e = email();
        e.subject = "Hi\r\nBcc: everyone@example.org".to_string();
        let mime = e.to_mime();
        assert!(mime.contains("Subject: HiBcc: everyone@example.org"));
        assert!(!mime.contains("\r\nBcc:"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let mut e = email();
        e.subject = "Café night".to_string();
        e.to_name = None;
        let mime = e.to_mime();
        assert!(mime.contains("To: ruth@example.org\r\n"));
        assert!(mime.contains("Subject: =?UTF-8?B?Q2Fmw6kgbmlnaHQ=?="));
    }

    #[test]
    fn test_raw_is_base64url_of_mime() {
        let e = email();
        let decoded = base64::engine::general_purpose::URL_SAFE.decode(e.to_raw()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), e.to_mime());
    }
}
