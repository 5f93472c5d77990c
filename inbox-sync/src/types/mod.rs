pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend-shaped inbox record, immutable as received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub body_preview: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
    pub received_date_time: DateTime<Utc>,
    #[serde(default)]
    pub web_link: Option<String>,
}

impl RawMessage {
    /// Sender address, if the record carries one
    pub fn sender_address(&self) -> Option<&str> {
        self.from
            .as_ref()
            .map(|r| r.email_address.address.as_str())
            .filter(|a| !a.is_empty())
    }

    /// Sender display name, if the record carries one
    pub fn sender_name(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|r| r.email_address.name.as_deref())
            .filter(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: String,
}

/// Normalized message ready for display
///
/// Created fresh on every sync pass. The photo URL is the only field that
/// changes after publication, and only through `PhotoUpdate` patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub id: String,
    pub subject: String,
    pub body_snippet: String,
    pub from_name: String,
    pub from_initials: String,
    pub from_email: String,
    pub unread: bool,
    pub has_attachment: bool,
    pub received: String,
    pub message_url: String,
    pub photo_url: Option<String>,
}

/// Binary photo body returned by the directory backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoResource {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoResource {
    /// Render the resource as a self-contained `data:` URL
    pub fn to_data_url(&self) -> String {
        use base64::Engine;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.content_type, encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_message_from_backend_json() {
        let json = r#"{
            "id": "AAMk1",
            "conversationId": "abc-1_2",
            "subject": "Lunch",
            "bodyPreview": " hi ",
            "isRead": false,
            "hasAttachments": true,
            "receivedDateTime": "2024-05-02T10:00:00Z",
            "webLink": "https://example.com/m/1",
            "from": { "emailAddress": { "name": "Jane Doe", "address": "jane@x.com" } }
        }"#;

        let raw: RawMessage = serde_json::from_str(json).unwrap();
        assert_eq!(raw.conversation_id, "abc-1_2");
        assert_eq!(raw.sender_address(), Some("jane@x.com"));
        assert_eq!(raw.sender_name(), Some("Jane Doe"));
        assert!(raw.has_attachments);
        assert!(!raw.is_read);
    }

    #[test]
    fn test_raw_message_without_sender() {
        let json = r#"{"id": "d1", "receivedDateTime": "2024-05-02T10:00:00Z"}"#;
        let raw: RawMessage = serde_json::from_str(json).unwrap();
        assert_eq!(raw.sender_address(), None);
        assert_eq!(raw.sender_name(), None);
        assert_eq!(raw.body_preview, "");
    }

    #[test]
    fn test_photo_data_url() {
        let photo = PhotoResource {
            content_type: "image/png".to_string(),
            bytes: b"png".to_vec(),
        };
        assert_eq!(photo.to_data_url(), "data:image/png;base64,cG5n");
    }
}
