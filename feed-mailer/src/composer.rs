use crate::types::{ComposeError, FeedEntry};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

pub const HTML_CONTENT_TYPE: &str = "text/html";

const PLACEHOLDER: char = '?';

/// A notification ready for delivery. Serialized to RFC 5322 only by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: String,
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
    pub content_type: String,
}

impl MailMessage {
    pub fn addressed_to(&self, recipient: &str) -> Self {
        Self {
            to: Some(recipient.to_string()),
            ..self.clone()
        }
    }
}

/// Renders feed entries into [`MailMessage`]s sent from a fixed address.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    from_address: String,
}

impl MessageComposer {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }

    pub fn compose(
        &self,
        entry: &FeedEntry,
        short_name: Option<&str>,
    ) -> Result<MailMessage, ComposeError> {
        let missing = |field| ComposeError::MalformedEntry {
            item_id: entry.id.clone(),
            field,
        };

        let title = entry.title.as_deref().ok_or_else(|| missing("title"))?;
        let description = entry
            .description
            .as_deref()
            .ok_or_else(|| missing("description"))?;
        let link = entry.link.as_deref().ok_or_else(|| missing("link"))?;
        let published_at = entry.published_at.ok_or_else(|| missing("publication time"))?;

        let title = sanitize_subject(&title.replace("&amp;", "&"));
        let subject = match short_name.filter(|name| !name.trim().is_empty()) {
            Some(name) => format!("[{}] {}", sanitize_subject(name), title),
            None => title,
        };

        let link = sanitize_text(link);
        let body = format!(
            "{description}\n\n<hr/>\n\n<p>This item was posted at {posted}.<br/>\nView the original at <a href=\"{link}\">{link}</a>.",
            description = sanitize_text(description),
            posted = format_posted_time(published_at),
            link = link,
        );

        Ok(MailMessage {
            from: self.from_address.clone(),
            to: None,
            subject,
            body,
            content_type: HTML_CONTENT_TYPE.to_string(),
        })
    }
}

/// Publication time in the local zone, e.g. `Tue Mar  2 14:05:09 2010`.
pub fn format_posted_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Replaces every character outside ASCII with a placeholder.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { PLACEHOLDER })
        .collect()
}

/// Like [`sanitize_text`], and folds line breaks so the value is safe as a header.
fn sanitize_subject(text: &str) -> String {
    let folded: String = sanitize_text(text)
        .chars()
        .map(|c| if c.is_ascii_control() { ' ' } else { c })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
