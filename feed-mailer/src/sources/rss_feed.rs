use crate::traits::FeedSource;
use crate::types::{FeedEntry, FetchConfig, FetchError};
use crate::{FeedParser, Fetcher};
use async_trait::async_trait;
use tracing::info;

/// [`FeedSource`] that downloads a feed document and parses it with feed-rs.
pub struct RssFeedSource {
    fetcher: Fetcher,
}

impl RssFeedSource {
    pub fn new(fetch_config: FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            fetcher: Fetcher::new(fetch_config)?,
        })
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, FetchError> {
        let content = self.fetcher.fetch(url).await?;
        let parsed_feed = FeedParser::parse_feed(&content)?;

        info!(
            "Pulled {} entries from {} ({})",
            parsed_feed.entries.len(),
            url,
            parsed_feed.title.as_deref().unwrap_or("untitled")
        );
        Ok(parsed_feed.entries)
    }
}
