//! Raw backend record → display record

use chrono::{DateTime, Locale, TimeZone};
use std::fmt::Display;

use crate::config::{DisplayConfig, LinkMode, DEFAULT_MESSAGE_URL_TEMPLATE};
use crate::types::error::SyncError;
use crate::types::{DisplayMessage, RawMessage};

/// Pure, total mapping from `RawMessage` to `DisplayMessage`
#[derive(Debug, Clone)]
pub struct MessageTransformer {
    locale: Locale,
    link: LinkMode,
}

impl MessageTransformer {
    pub fn new(locale: Locale, link: LinkMode) -> Self {
        Self { locale, link }
    }

    pub fn from_config(display: &DisplayConfig) -> Result<Self, SyncError> {
        Ok(Self::new(display.locale()?, display.link.clone()))
    }

    /// Transform one record. `now` decides which calendar day is "today"
    /// and which time zone labels are rendered in.
    pub fn transform<Tz>(&self, raw: &RawMessage, now: &DateTime<Tz>) -> DisplayMessage
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let from_email = raw.sender_address().unwrap_or_default().to_string();
        let from_name = raw
            .sender_name()
            .map(str::to_string)
            .unwrap_or_else(|| from_email.clone());

        DisplayMessage {
            id: raw.id.clone(),
            subject: raw.subject.clone().unwrap_or_default(),
            body_snippet: raw.body_preview.trim().to_string(),
            from_initials: initials(&from_name),
            from_name,
            from_email,
            unread: !raw.is_read,
            has_attachment: raw.has_attachments,
            received: self.received_label(&raw.received_date_time, now),
            message_url: self.message_url(raw),
            photo_url: None,
        }
    }

    /// Order-preserving transform of a whole listing
    pub fn transform_all<Tz>(&self, raws: &[RawMessage], now: &DateTime<Tz>) -> Vec<DisplayMessage>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        raws.iter().map(|raw| self.transform(raw, now)).collect()
    }

    /// Time of day when received on `now`'s calendar day, else a short date
    pub fn received_label<T, Tz>(&self, received: &DateTime<T>, now: &DateTime<Tz>) -> String
    where
        T: TimeZone,
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let local = received.with_timezone(&now.timezone());

        if local.date_naive() == now.date_naive() {
            // Locales without AM/PM markers use a 24-hour clock
            let uses_12_hour = !local
                .format_localized("%p", self.locale)
                .to_string()
                .is_empty();
            let pattern = if uses_12_hour { "%-I:%M %p" } else { "%H:%M" };
            local.format_localized(pattern, self.locale).to_string()
        } else {
            local.format_localized("%x", self.locale).to_string()
        }
    }

    pub fn message_url(&self, raw: &RawMessage) -> String {
        match &self.link {
            LinkMode::WebLink => match raw.web_link.as_deref() {
                Some(link) if !link.is_empty() => link.to_string(),
                _ => build_from_template(DEFAULT_MESSAGE_URL_TEMPLATE, &raw.conversation_id),
            },
            LinkMode::Template { template } => build_from_template(template, &raw.conversation_id),
        }
    }
}

fn build_from_template(template: &str, conversation_id: &str) -> String {
    template.replace("{id}", &encode_conversation_id(conversation_id))
}

/// Percent-encode a conversation id the way the mail web app expects:
/// component encoding, then `-` → `%2F` and `_` → `%2B`
pub fn encode_conversation_id(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('-', "%2F")
        .replace('_', "%2B")
}

/// First letter of the first and last words, upper-cased
pub fn initials(name: &str) -> String {
    let mut words = name.split_whitespace();
    let first = words.next().and_then(|w| w.chars().next());
    let last = words.last().and_then(|w| w.chars().next());

    first
        .into_iter()
        .chain(last)
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmailAddress, Recipient};
    use chrono::{FixedOffset, Utc};

    fn raw(received: &str) -> RawMessage {
        RawMessage {
            id: "1".to_string(),
            conversation_id: "abc-1_2".to_string(),
            subject: Some("Lunch".to_string()),
            from: Some(Recipient {
                email_address: EmailAddress {
                    name: Some("Jane Doe".to_string()),
                    address: "jane@x.com".to_string(),
                },
            }),
            body_preview: " hi ".to_string(),
            is_read: false,
            has_attachments: true,
            received_date_time: received.parse().unwrap(),
            web_link: Some("http://x".to_string()),
        }
    }

    fn template_transformer(locale: Locale) -> MessageTransformer {
        MessageTransformer::new(
            locale,
            LinkMode::Template {
                template: "https://mail.example.com/c/{id}".to_string(),
            },
        )
    }

    #[test]
    fn test_example_message() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();
        let msg = template_transformer(Locale::en_US).transform(&raw("2024-05-02T10:00:00Z"), &now);

        assert_eq!(msg.id, "1");
        assert_eq!(msg.subject, "Lunch");
        assert_eq!(msg.from_initials, "JD");
        assert_eq!(msg.from_name, "Jane Doe");
        assert_eq!(msg.from_email, "jane@x.com");
        assert_eq!(msg.body_snippet, "hi");
        assert!(msg.unread);
        assert!(msg.has_attachment);
        assert_eq!(msg.received, "10:00 AM");
        assert_eq!(msg.message_url, "https://mail.example.com/c/abc%2F1%2B2");
        assert_eq!(msg.photo_url, None);
    }

    #[test]
    fn test_other_day_uses_short_date() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();
        let transformer = template_transformer(Locale::en_US);
        let msg = transformer.transform(&raw("2024-05-01T10:00:00Z"), &now);
        assert_eq!(msg.received, "05/01/2024");
    }

    #[test]
    fn test_locale_sensitive_labels() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();
        let transformer = template_transformer(Locale::de_DE);

        let today = transformer.transform(&raw("2024-05-02T14:05:00Z"), &now);
        assert_eq!(today.received, "14:05");

        let earlier = transformer.transform(&raw("2024-05-01T10:00:00Z"), &now);
        assert_eq!(earlier.received, "01.05.2024");
    }

    #[test]
    fn test_today_is_judged_in_local_time() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        let transformer = template_transformer(Locale::en_US);

        // 23:30 UTC on the 1st is 01:30 on the 2nd at +02:00
        let msg = transformer.transform(&raw("2024-05-01T23:30:00Z"), &now);
        assert_eq!(msg.received, "1:30 AM");
    }

    #[test]
    fn test_web_link_mode() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();
        let transformer = MessageTransformer::new(Locale::en_US, LinkMode::WebLink);
        assert_eq!(transformer.transform(&raw("2024-05-02T10:00:00Z"), &now).message_url, "http://x");

        let mut without_link = raw("2024-05-02T10:00:00Z");
        without_link.web_link = None;
        assert_eq!(
            transformer.message_url(&without_link),
            "https://outlook.office.com/mail/inbox/id/abc%2F1%2B2"
        );
    }

    #[test]
    fn test_url_is_idempotent() {
        let transformer = template_transformer(Locale::en_US);
        let message = raw("2024-05-02T10:00:00Z");
        assert_eq!(transformer.message_url(&message), transformer.message_url(&message));
    }

    #[test]
    fn test_transform_all_preserves_order() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();
        let raws: Vec<RawMessage> = (0..5)
            .map(|i| {
                let mut r = raw("2024-05-02T10:00:00Z");
                r.id = format!("m{}", i);
                r
            })
            .collect();

        let ids: Vec<String> = template_transformer(Locale::en_US)
            .transform_all(&raws, &now)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_missing_sender_falls_back() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap();
        let mut message = raw("2024-05-02T10:00:00Z");
        message.from = Some(Recipient {
            email_address: EmailAddress {
                name: None,
                address: "bob@x.com".to_string(),
            },
        });
        let msg = template_transformer(Locale::en_US).transform(&message, &now);
        assert_eq!(msg.from_name, "bob@x.com");
        assert_eq!(msg.from_initials, "B");

        message.from = None;
        let msg = template_transformer(Locale::en_US).transform(&message, &now);
        assert_eq!(msg.from_email, "");
        assert_eq!(msg.from_initials, "");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("Jane Doe"), "JD");
        assert_eq!(initials("jane van der doe"), "JD");
        assert_eq!(initials("Cher"), "C");
        assert_eq!(initials("  "), "");
    }

    #[test]
    fn test_encode_conversation_id() {
        assert_eq!(encode_conversation_id("abc-1_2"), "abc%2F1%2B2");
        assert_eq!(encode_conversation_id("a b"), "a%20b");
        assert_eq!(encode_conversation_id("AAQk+/="), "AAQk%2B%2F%3D");
    }
}
