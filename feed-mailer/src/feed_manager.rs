use crate::traits::SubscriptionStore;
use crate::types::{FeedId, FeedRecord, MailerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS Feeds (
        FeedId INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        Url VARCHAR(256) UNIQUE NOT NULL,
        ShortName VARCHAR(256),
        Description VARCHAR(256),
        LastFetched INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS FeedItems (
        FeedId INTEGER NOT NULL,
        Guid VARCHAR(256) NOT NULL,
        WhenSeen INTEGER,
        PRIMARY KEY (FeedId, Guid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Subscriptions (
        FeedId INTEGER,
        Email VARCHAR(256) NOT NULL,
        Active BOOLEAN,
        PRIMARY KEY (FeedId, Email)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Filters (
        FeedId INTEGER,
        RegExp VARCHAR(256) NOT NULL,
        PRIMARY KEY (FeedId, RegExp)
    )
    "#,
];

/// Ledger inserts and watermark updates waiting for `commit`.
#[derive(Debug, Default)]
struct PendingChanges {
    seen: Vec<(FeedId, String, i64)>,
    seen_keys: HashSet<(FeedId, String)>,
    last_fetched: HashMap<FeedId, i64>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.seen.is_empty() && self.last_fetched.is_empty()
    }
}

/// SQLite-backed [`SubscriptionStore`].
pub struct FeedManager {
    db: SqlitePool,
    pending: Mutex<PendingChanges>,
}

impl FeedManager {
    /// Opens an existing database file. A missing file is an error.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(db))
    }

    /// Opens the database file, creating it if needed.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(db))
    }

    pub fn from_pool(db: SqlitePool) -> Self {
        Self {
            db,
            pending: Mutex::new(PendingChanges::default()),
        }
    }

    pub fn get_db_pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn setup_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.db).await?;
        }
        info!("Database schema is in place");
        Ok(())
    }

    async fn is_recorded(&self, feed_id: FeedId, item_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM FeedItems WHERE FeedId = ? AND Guid = ?")
            .bind(feed_id)
            .bind(item_id)
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get::<i64, _>("count")? > 0)
    }
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

#[async_trait]
impl SubscriptionStore for FeedManager {
    async fn list_feeds(&self) -> Result<Vec<FeedRecord>> {
        let rows = sqlx::query(
            "SELECT FeedId, Url, ShortName, Description, LastFetched FROM Feeds ORDER BY FeedId",
        )
        .fetch_all(&self.db)
        .await?;

        let mut feeds = Vec::with_capacity(rows.len());
        for row in rows {
            feeds.push(FeedRecord {
                id: row.try_get("FeedId")?,
                url: row.try_get("Url")?,
                short_name: row.try_get("ShortName")?,
                description: row.try_get("Description")?,
                last_fetched: row
                    .try_get::<Option<i64>, _>("LastFetched")?
                    .and_then(from_unix),
            });
        }

        Ok(feeds)
    }

    async fn list_active_subscriptions(&self) -> Result<HashMap<FeedId, Vec<String>>> {
        let rows = sqlx::query("SELECT FeedId, Email FROM Subscriptions WHERE Active = 1")
            .fetch_all(&self.db)
            .await?;

        let mut subscriptions: HashMap<FeedId, Vec<String>> = HashMap::new();
        for row in rows {
            let email: String = row.try_get("Email")?;
            match row.try_get::<Option<FeedId>, _>("FeedId")? {
                Some(feed_id) => subscriptions.entry(feed_id).or_default().push(email),
                None => warn!("Ignoring subscription of {} with no feed", email),
            }
        }

        Ok(subscriptions)
    }

    async fn list_filters(&self) -> Result<HashMap<FeedId, Vec<String>>> {
        let rows = sqlx::query("SELECT FeedId, RegExp FROM Filters")
            .fetch_all(&self.db)
            .await?;

        let mut filters: HashMap<FeedId, Vec<String>> = HashMap::new();
        for row in rows {
            let pattern: String = row.try_get("RegExp")?;
            match row.try_get::<Option<FeedId>, _>("FeedId")? {
                Some(feed_id) => filters.entry(feed_id).or_default().push(pattern),
                None => warn!("Ignoring filter {:?} with no feed", pattern),
            }
        }

        Ok(filters)
    }

    async fn has_seen(&self, feed_id: FeedId, item_id: &str) -> Result<bool> {
        {
            let pending = self.pending.lock().await;
            if pending.seen_keys.contains(&(feed_id, item_id.to_string())) {
                return Ok(true);
            }
        }

        self.is_recorded(feed_id, item_id).await
    }

    async fn mark_seen(&self, feed_id: FeedId, item_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let key = (feed_id, item_id.to_string());

        if pending.seen_keys.contains(&key) || self.is_recorded(feed_id, item_id).await? {
            return Err(MailerError::AlreadySeen {
                feed_id,
                item_id: item_id.to_string(),
            });
        }

        pending.seen.push((feed_id, item_id.to_string(), at.timestamp()));
        pending.seen_keys.insert(key);
        debug!("Staged ledger entry {} for feed {}", item_id, feed_id);
        Ok(())
    }

    async fn update_last_fetched(&self, feed_id: FeedId, at: DateTime<Utc>) -> Result<()> {
        let mut pending = self.pending.lock().await;
        pending.last_fetched.insert(feed_id, at.timestamp());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            debug!("Nothing to commit");
            return Ok(());
        }
        let changes = std::mem::take(&mut *pending);

        let mut tx = self.db.begin().await?;

        for (feed_id, item_id, when_seen) in &changes.seen {
            sqlx::query("INSERT INTO FeedItems (FeedId, Guid, WhenSeen) VALUES (?, ?, ?)")
                .bind(*feed_id)
                .bind(item_id.as_str())
                .bind(*when_seen)
                .execute(&mut *tx)
                .await?;
        }

        for (feed_id, last_fetched) in &changes.last_fetched {
            sqlx::query("UPDATE Feeds SET LastFetched = ? WHERE FeedId = ?")
                .bind(*last_fetched)
                .bind(*feed_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(
            "Committed {} ledger entries and {} feed watermarks",
            changes.seen.len(),
            changes.last_fetched.len()
        );
        Ok(())
    }
}
