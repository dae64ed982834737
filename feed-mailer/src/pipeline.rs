use crate::composer::MessageComposer;
use crate::dispatcher::{transport_for, Dispatcher};
use crate::filter::FilterBook;
use crate::ledger::DedupLedger;
use crate::traits::{FeedSource, MailTransport, SubscriptionStore};
use crate::types::{FeedId, FeedRecord, PipelineConfig, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedOutcome {
    NoSubscribers,
    FetchFailed { error: String },
    Processed,
}

/// What happened to one feed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReport {
    pub feed_id: FeedId,
    pub url: String,
    pub outcome: FeedOutcome,
    pub entries: usize,
    pub already_seen: usize,
    pub filtered: usize,
    pub malformed: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub recorded: usize,
}

impl FeedReport {
    fn new(feed: &FeedRecord, outcome: FeedOutcome) -> Self {
        Self {
            feed_id: feed.id,
            url: feed.url.clone(),
            outcome,
            entries: 0,
            already_seen: 0,
            filtered: 0,
            malformed: 0,
            delivered: 0,
            failed_deliveries: 0,
            recorded: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub feeds: Vec<FeedReport>,
}

impl PassReport {
    pub fn feed(&self, feed_id: FeedId) -> Option<&FeedReport> {
        self.feeds.iter().find(|report| report.feed_id == feed_id)
    }

    pub fn total_delivered(&self) -> usize {
        self.feeds.iter().map(|report| report.delivered).sum()
    }

    pub fn total_failed_deliveries(&self) -> usize {
        self.feeds.iter().map(|report| report.failed_deliveries).sum()
    }

    pub fn total_recorded(&self) -> usize {
        self.feeds.iter().map(|report| report.recorded).sum()
    }

    pub fn fetch_failures(&self) -> usize {
        self.feeds
            .iter()
            .filter(|report| matches!(report.outcome, FeedOutcome::FetchFailed { .. }))
            .count()
    }
}

/// Runs one pass over every provisioned feed: fetch, dedup, filter, compose,
/// dispatch, record, and finally commit.
pub struct FeedPipeline {
    store: Arc<dyn SubscriptionStore>,
    ledger: DedupLedger,
    source: Arc<dyn FeedSource>,
    composer: MessageComposer,
    dispatcher: Dispatcher,
    dry_run: bool,
}

impl FeedPipeline {
    /// Under `config.dry_run` messages are printed to stdout and `transport` is never used.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn FeedSource>,
        transport: Arc<dyn MailTransport>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ledger: DedupLedger::new(store.clone()),
            store,
            source,
            composer: MessageComposer::new(config.from_address),
            dispatcher: Dispatcher::new(transport_for(config.dry_run, transport)),
            dry_run: config.dry_run,
        }
    }

    /// Any error returned here is fatal for the pass; nothing has been committed.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let started_at = Utc::now();

        let subscriptions = self.store.list_active_subscriptions().await?;
        let filters = FilterBook::compile(&self.store.list_filters().await?)?;
        let feeds = self.store.list_feeds().await?;

        info!(
            "Starting pass over {} feeds{}",
            feeds.len(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        let mut report = PassReport {
            started_at,
            dry_run: self.dry_run,
            feeds: Vec::with_capacity(feeds.len()),
        };

        for feed in &feeds {
            let feed_report = self.process_feed(feed, &subscriptions, &filters).await?;
            report.feeds.push(feed_report);
        }

        if !self.dry_run {
            self.store.commit().await?;
        }

        info!(
            "Pass complete: {} deliveries, {} failed deliveries, {} new items recorded, {} feeds failed to fetch",
            report.total_delivered(),
            report.total_failed_deliveries(),
            report.total_recorded(),
            report.fetch_failures()
        );

        Ok(report)
    }

    async fn process_feed(
        &self,
        feed: &FeedRecord,
        subscriptions: &HashMap<FeedId, Vec<String>>,
        filters: &FilterBook,
    ) -> Result<FeedReport> {
        info!("Processing feed {}", feed.url);

        let subscribers = match subscriptions.get(&feed.id) {
            Some(subscribers) if !subscribers.is_empty() => subscribers,
            _ => {
                debug!("Skipping {} with no subscribers", feed.url);
                return Ok(FeedReport::new(feed, FeedOutcome::NoSubscribers));
            }
        };

        let entries = match self.source.fetch(&feed.url).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping {} this pass, fetch failed: {}", feed.url, e);
                return Ok(FeedReport::new(
                    feed,
                    FeedOutcome::FetchFailed {
                        error: e.to_string(),
                    },
                ));
            }
        };

        let mut report = FeedReport::new(feed, FeedOutcome::Processed);
        report.entries = entries.len();

        for entry in &entries {
            debug!("Got item {}", entry.id);

            if !self.dry_run && self.ledger.has_been_seen(feed.id, &entry.id).await? {
                debug!("Skipping {} because we've already seen it", entry.id);
                report.already_seen += 1;
                continue;
            }

            if let Some(pattern) = filters.first_match(feed.id, entry.body()) {
                debug!("Skipping {} because it matches filter {:?}", entry.id, pattern);
                report.filtered += 1;
                continue;
            }

            let message = match self.composer.compose(entry, feed.short_name.as_deref()) {
                Ok(message) => message,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.id, e);
                    report.malformed += 1;
                    continue;
                }
            };

            let summary = self.dispatcher.deliver_all(&message, subscribers).await;
            report.delivered += summary.delivered;
            report.failed_deliveries += summary.failed.len();

            if !self.dry_run {
                self.ledger.record_seen(feed.id, &entry.id, Utc::now()).await?;
                report.recorded += 1;
            }
        }

        if !self.dry_run {
            self.store.update_last_fetched(feed.id, Utc::now()).await?;
        }

        info!(
            "Feed {}: {} entries, {} delivered, {} filtered, {} already seen",
            feed.url, report.entries, report.delivered, report.filtered, report.already_seen
        );

        Ok(report)
    }
}
