//! Delivery channels for broadcasts.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::firestore::encode_record;
use crate::api::{DocumentWriter, EmailMessage, EmailTransport};
use crate::models::{DirectMessage, Member, Notification};
use crate::utils::non_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    DirectMessage,
}

impl Channel {
    /// The channel-specific address of a recipient, if it has one
    pub fn identifier<'a>(&self, recipient: &'a Recipient) -> Option<&'a str> {
        match self {
            Channel::Email => non_blank(recipient.email.as_deref()),
            Channel::DirectMessage => non_blank(recipient.user_id.as_deref()),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::DirectMessage => write!(f, "direct message"),
        }
    }
}

/// A person a broadcast is addressed to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipient {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub user_id: Option<String>,
}

impl Recipient {
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

impl From<&Member> for Recipient {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.clone(),
            first_name: member.first_name.clone(),
            last_name: member.last_name.clone(),
            email: member.email.clone(),
            user_id: member.user_id.clone(),
        }
    }
}

/// Message content shared by every recipient of a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: Option<String>,
    pub body: String,
}

impl OutgoingMessage {
    pub fn new(subject: Option<String>, body: impl Into<String>) -> Self {
        Self { subject, body: body.into() }
    }

    /// Fill `{first_name}`, `{last_name}` and `{name}` for one recipient.
    /// Other braces are left as written.
    pub fn personalize(&self, recipient: &Recipient) -> OutgoingMessage {
        let fill = |text: &str| {
            text.replace("{first_name}", &recipient.first_name)
                .replace("{last_name}", &recipient.last_name)
                .replace("{name}", &recipient.name())
        };
        OutgoingMessage {
            subject: self.subject.as_deref().map(fill),
            body: fill(&self.body),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("{recipient} has no {channel} address")]
    MissingIdentifier { recipient: String, channel: Channel },

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// One delivery channel. Implementations make a single attempt per call.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn deliver(&self, recipient: &Recipient, message: &OutgoingMessage) -> Result<(), DeliveryError>;
}

fn require_identifier(channel: Channel, recipient: &Recipient) -> Result<String, DeliveryError> {
    channel
        .identifier(recipient)
        .map(str::to_string)
        .ok_or_else(|| DeliveryError::MissingIdentifier { recipient: recipient.name(), channel })
}

/// Sends each recipient an email through an [`EmailTransport`]
pub struct EmailSender<T> {
    transport: T,
    from: Option<(String, String)>,
    default_subject: String,
}

impl<T: EmailTransport> EmailSender<T> {
    pub fn new(transport: T, default_subject: impl Into<String>) -> Self {
        Self {
            transport,
            from: None,
            default_subject: default_subject.into(),
        }
    }

    pub fn with_from(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.from = Some((name.into(), address.into()));
        self
    }

    fn build_email(&self, to: String, recipient: &Recipient, message: &OutgoingMessage) -> EmailMessage {
        let subject = message
            .subject
            .as_deref()
            .and_then(|s| non_blank(Some(s)))
            .unwrap_or(self.default_subject.as_str())
            .to_string();
        EmailMessage {
            to,
            to_name: Some(recipient.name()).filter(|n| !n.is_empty()),
            from: self.from.clone(),
            subject,
            body: message.body.clone(),
        }
    }
}

#[async_trait]
impl<T: EmailTransport> MessageSender for EmailSender<T> {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn deliver(&self, recipient: &Recipient, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let to = require_identifier(Channel::Email, recipient)?;
        let email = self.build_email(to, recipient, message);
        let id = self.transport.send_email(&email).await?;
        debug!(recipient = %recipient.id, message_id = %id, "Email delivered");
        Ok(())
    }
}

/// Writes an in-app direct message plus a bell notification
pub struct DirectMessageSender<W> {
    writer: W,
    sender_id: String,
    sender_name: String,
}

impl<W: DocumentWriter> DirectMessageSender<W> {
    pub fn new(writer: W, sender_id: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self {
            writer,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
        }
    }
}

#[async_trait]
impl<W: DocumentWriter> MessageSender for DirectMessageSender<W> {
    fn channel(&self) -> Channel {
        Channel::DirectMessage
    }

    async fn deliver(&self, recipient: &Recipient, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let uid = require_identifier(Channel::DirectMessage, recipient)?;
        let dm = DirectMessage {
            id: String::new(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            recipient_id: uid,
            recipient_name: recipient.name(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            created_at: Utc::now(),
            read: false,
        };

        let fields = encode_record(&dm, DirectMessage::TIMESTAMP_FIELDS)?;
        let id = self.writer.create_document(DirectMessage::COLLECTION, fields).await?;
        debug!(recipient = %recipient.id, message_id = %id, "Direct message written");

        // The message itself is the delivery; a missing bell is only logged
        let notification = Notification::for_message(&dm);
        let written = match encode_record(&notification, Notification::TIMESTAMP_FIELDS) {
            Ok(fields) => self.writer.create_document(Notification::COLLECTION, fields).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(recipient = %recipient.id, error = %e, "Failed to write message notification");
        }
        Ok(())
    }
}
