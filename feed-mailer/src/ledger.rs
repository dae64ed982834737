use crate::traits::SubscriptionStore;
use crate::types::{FeedId, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The (feed, item) pairs that have already been processed.
///
/// Recording is authoritative: once an item is recorded it is never
/// delivered again, whatever happened to the individual deliveries.
pub struct DedupLedger {
    store: Arc<dyn SubscriptionStore>,
}

impl DedupLedger {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn has_been_seen(&self, feed_id: FeedId, item_id: &str) -> Result<bool> {
        self.store.has_seen(feed_id, item_id).await
    }

    pub async fn record_seen(&self, feed_id: FeedId, item_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.store.mark_seen(feed_id, item_id, at).await
    }
}
