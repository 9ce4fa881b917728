use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-app direct message, stored in the `messages` collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DirectMessage {
    #[serde(default)]
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub recipient_name: String,
    pub subject: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl DirectMessage {
    pub const COLLECTION: &'static str = "messages";
    pub const TIMESTAMP_FIELDS: &'static [&'static str] = &["createdAt"];
}

/// Bell notification shown to the recipient, stored in `notifications`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    pub const COLLECTION: &'static str = "notifications";
    pub const TIMESTAMP_FIELDS: &'static [&'static str] = &["createdAt"];

    /// Notification announcing a new direct message
    pub fn for_message(message: &DirectMessage) -> Self {
        let title = match &message.subject {
            Some(subject) if !subject.trim().is_empty() => {
                format!("{}: {}", message.sender_name, subject.trim())
            }
            _ => format!("New message from {}", message.sender_name),
        };
        Self {
            id: String::new(),
            user_id: message.recipient_id.clone(),
            kind: "message".to_string(),
            title,
            body: crate::utils::truncate(&message.body, 140),
            created_at: message.created_at,
            read: false,
        }
    }
}
