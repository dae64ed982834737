use crate::types::{FeedEntry, FetchError, ParsedFeed};
use feed_rs::parser;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    /// Parses an RSS, Atom or JSON Feed document.
    pub fn parse_feed(content: &str) -> Result<ParsedFeed, FetchError> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| FetchError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let entries: Vec<FeedEntry> = feed.entries.into_iter().map(Self::convert_entry).collect();

        debug!("Parsed feed with {} entries", entries.len());

        Ok(ParsedFeed { title, entries })
    }

    fn convert_entry(entry: feed_rs::model::Entry) -> FeedEntry {
        let title = entry.title.map(|t| t.content);

        // RSS <description> lands in `summary`; Atom-only feeds may carry just <content>.
        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body));

        let link = entry.links.into_iter().next().map(|l| l.href);
        let published_at = entry.published.or(entry.updated);

        FeedEntry {
            id: entry.id,
            title,
            description,
            link,
            published_at,
        }
    }
}
