#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feed_mailer::{
    FeedEntry, FeedId, FeedRecord, FeedSource, FetchError, MailMessage, MailTransport,
    MailerError, Result, SubscriptionStore, TransportError,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const FROM: &str = "feeds@example.com";

pub fn feed(id: FeedId, url: &str, short_name: Option<&str>) -> FeedRecord {
    FeedRecord {
        id,
        url: url.to_string(),
        short_name: short_name.map(str::to_string),
        description: None,
        last_fetched: None,
    }
}

pub fn entry(id: &str, title: &str, body: &str) -> FeedEntry {
    FeedEntry {
        id: id.to_string(),
        title: Some(title.to_string()),
        description: Some(body.to_string()),
        link: Some(format!("https://example.com/{}", id)),
        published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
    }
}

/// Everything a [`MemoryStore`] has durably committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub feeds: Vec<FeedRecord>,
    pub subscriptions: Vec<(FeedId, String, bool)>,
    pub filters: Vec<(FeedId, String)>,
    pub seen: BTreeMap<(FeedId, String), DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Staged {
    seen: Vec<(FeedId, String, DateTime<Utc>)>,
    last_fetched: HashMap<FeedId, DateTime<Utc>>,
}

/// In-memory [`SubscriptionStore`] with the same stage-then-commit behaviour as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    committed: Mutex<StoreState>,
    staged: Mutex<Staged>,
    fail_commit: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, feed: FeedRecord) -> Self {
        self.committed.lock().unwrap().feeds.push(feed);
        self
    }

    pub fn with_subscriber(self, feed_id: FeedId, email: &str) -> Self {
        self.committed
            .lock()
            .unwrap()
            .subscriptions
            .push((feed_id, email.to_string(), true));
        self
    }

    pub fn with_inactive_subscriber(self, feed_id: FeedId, email: &str) -> Self {
        self.committed
            .lock()
            .unwrap()
            .subscriptions
            .push((feed_id, email.to_string(), false));
        self
    }

    pub fn with_filter(self, feed_id: FeedId, pattern: &str) -> Self {
        self.committed
            .lock()
            .unwrap()
            .filters
            .push((feed_id, pattern.to_string()));
        self
    }

    pub fn with_seen(self, feed_id: FeedId, item_id: &str) -> Self {
        self.committed
            .lock()
            .unwrap()
            .seen
            .insert((feed_id, item_id.to_string()), Utc::now());
        self
    }

    pub fn fail_commits(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StoreState {
        self.committed.lock().unwrap().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn is_recorded(&self, feed_id: FeedId, item_id: &str) -> bool {
        self.committed
            .lock()
            .unwrap()
            .seen
            .contains_key(&(feed_id, item_id.to_string()))
    }

    pub fn last_fetched(&self, feed_id: FeedId) -> Option<DateTime<Utc>> {
        self.committed
            .lock()
            .unwrap()
            .feeds
            .iter()
            .find(|feed| feed.id == feed_id)
            .and_then(|feed| feed.last_fetched)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_feeds(&self) -> Result<Vec<FeedRecord>> {
        Ok(self.committed.lock().unwrap().feeds.clone())
    }

    async fn list_active_subscriptions(&self) -> Result<HashMap<FeedId, Vec<String>>> {
        let mut subscriptions: HashMap<FeedId, Vec<String>> = HashMap::new();
        for (feed_id, email, active) in &self.committed.lock().unwrap().subscriptions {
            if *active {
                subscriptions.entry(*feed_id).or_default().push(email.clone());
            }
        }
        Ok(subscriptions)
    }

    async fn list_filters(&self) -> Result<HashMap<FeedId, Vec<String>>> {
        let mut filters: HashMap<FeedId, Vec<String>> = HashMap::new();
        for (feed_id, pattern) in &self.committed.lock().unwrap().filters {
            filters.entry(*feed_id).or_default().push(pattern.clone());
        }
        Ok(filters)
    }

    async fn has_seen(&self, feed_id: FeedId, item_id: &str) -> Result<bool> {
        let staged = self
            .staged
            .lock()
            .unwrap()
            .seen
            .iter()
            .any(|(id, item, _)| *id == feed_id && item == item_id);
        Ok(staged || self.is_recorded(feed_id, item_id))
    }

    async fn mark_seen(&self, feed_id: FeedId, item_id: &str, at: DateTime<Utc>) -> Result<()> {
        if self.has_seen(feed_id, item_id).await? {
            return Err(MailerError::AlreadySeen {
                feed_id,
                item_id: item_id.to_string(),
            });
        }
        self.staged
            .lock()
            .unwrap()
            .seen
            .push((feed_id, item_id.to_string(), at));
        Ok(())
    }

    async fn update_last_fetched(&self, feed_id: FeedId, at: DateTime<Utc>) -> Result<()> {
        self.staged.lock().unwrap().last_fetched.insert(feed_id, at);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(MailerError::Database(sqlx::Error::PoolClosed));
        }

        let staged = std::mem::take(&mut *self.staged.lock().unwrap());
        let mut committed = self.committed.lock().unwrap();
        for (feed_id, item_id, at) in staged.seen {
            committed.seen.insert((feed_id, item_id), at);
        }
        for feed in committed.feeds.iter_mut() {
            if let Some(at) = staged.last_fetched.get(&feed.id) {
                feed.last_fetched = Some(*at);
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// [`FeedSource`] serving canned entries per URL and remembering what was fetched.
#[derive(Default)]
pub struct StaticFeedSource {
    feeds: Mutex<HashMap<String, std::result::Result<Vec<FeedEntry>, String>>>,
    fetched: Mutex<Vec<String>>,
}

impl StaticFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, url: &str, entries: Vec<FeedEntry>) -> Self {
        self.feeds.lock().unwrap().insert(url.to_string(), Ok(entries));
        self
    }

    pub fn fail(self, url: &str, error: &str) -> Self {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error.to_string()));
        self
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<FeedEntry>, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.feeds.lock().unwrap().get(url) {
            Some(Ok(entries)) => Ok(entries.clone()),
            Some(Err(error)) => Err(FetchError::Parse(error.clone())),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// [`MailTransport`] that records deliveries and rejects chosen recipients.
#[derive(Default)]
pub struct RecordingTransport {
    rejected: HashSet<String>,
    sent: Mutex<Vec<MailMessage>>,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, recipient: &str) -> Self {
        self.rejected.insert(recipient.to_string());
        self
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// (recipient, subject) of every successful delivery, in order.
    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .map(|message| (message.to.unwrap_or_default(), message.subject))
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &MailMessage) -> std::result::Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let recipient = message.to.clone().ok_or(TransportError::MissingRecipient)?;
        if self.rejected.contains(&recipient) {
            return Err(TransportError::Rejected(format!("{} refused", recipient)));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
