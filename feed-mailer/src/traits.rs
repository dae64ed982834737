use crate::composer::MailMessage;
use crate::types::{FeedEntry, FeedId, FeedRecord, FetchError, Result, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Persistent feed, subscription, filter and ledger storage.
///
/// Mutations (`mark_seen`, `update_last_fetched`) are staged and only become
/// durable on `commit`. Reads of the ledger see staged entries.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_feeds(&self) -> Result<Vec<FeedRecord>>;

    /// Recipients of every feed, active subscriptions only.
    async fn list_active_subscriptions(&self) -> Result<HashMap<FeedId, Vec<String>>>;

    async fn list_filters(&self) -> Result<HashMap<FeedId, Vec<String>>>;

    async fn has_seen(&self, feed_id: FeedId, item_id: &str) -> Result<bool>;

    /// Fails with `MailerError::AlreadySeen` if the pair is already recorded.
    async fn mark_seen(&self, feed_id: FeedId, item_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn update_last_fetched(&self, feed_id: FeedId, at: DateTime<Utc>) -> Result<()>;

    async fn commit(&self) -> Result<()>;
}

/// Retrieves and parses the entries currently served at a feed URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<FeedEntry>, FetchError>;
}

/// Hands one addressed message to a mail system.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> std::result::Result<(), TransportError>;
}
