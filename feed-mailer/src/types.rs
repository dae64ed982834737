use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

pub type FeedId = i64;

/// A provisioned feed as stored in the `Feeds` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub id: FeedId,
    pub url: String,
    pub short_name: Option<String>,
    pub description: Option<String>,
    pub last_fetched: Option<DateTime<Utc>>,
}

/// One entry as produced by a [`crate::traits::FeedSource`]. Only `id` is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedEntry {
    /// Text the exclusion filters are matched against.
    pub fn body(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("feed-mailer/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

/// Process-wide settings consumed by the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub from_address: String,
    pub dry_run: bool,
}

impl PipelineConfig {
    pub fn new(from_address: impl Into<String>, dry_run: bool) -> Result<Self> {
        let from_address = from_address.into();
        if from_address.trim().is_empty() {
            return Err(MailerError::Config("From-address must not be empty".to_string()));
        }
        from_address.parse::<Mailbox>().map_err(|e| {
            MailerError::Config(format!("Invalid from-address {:?}: {}", from_address, e))
        })?;

        Ok(Self { from_address, dry_run })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("Malformed entry {item_id}: missing {field}")]
    MalformedEntry { item_id: String, field: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Message has no recipient")]
    MissingRecipient,

    #[error("Invalid content type: {0}")]
    ContentType(String),

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("Sendmail failed: {0}")]
    Sendmail(#[from] lettre::transport::sendmail::Error),

    #[error("Rejected by transport: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid filter {pattern:?} for feed {feed_id}: {source}")]
    InvalidFilter {
        feed_id: FeedId,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Item {item_id} already recorded for feed {feed_id}")]
    AlreadySeen { feed_id: FeedId, item_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MailerError>;
