use crate::types::{FeedId, MailerError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

/// Case-insensitive search of `body_text` against each pattern, stopping at the first hit.
pub fn matches_any(body_text: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(body_text))
}

fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Exclusion patterns of a single feed.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    patterns: Vec<Regex>,
}

impl FilterSet {
    pub fn compile(feed_id: FeedId, patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                compile_pattern(pattern).map_err(|source| MailerError::InvalidFilter {
                    feed_id,
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn matches_any(&self, body_text: &str) -> bool {
        matches_any(body_text, &self.patterns)
    }

    /// The first pattern that matches, for reporting.
    pub fn first_match(&self, body_text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.is_match(body_text))
            .map(Regex::as_str)
    }
}

/// Compiled filters of every feed for one pass.
#[derive(Debug, Clone, Default)]
pub struct FilterBook {
    by_feed: HashMap<FeedId, FilterSet>,
}

impl FilterBook {
    pub fn compile(raw: &HashMap<FeedId, Vec<String>>) -> Result<Self> {
        let mut by_feed = HashMap::with_capacity(raw.len());
        for (feed_id, patterns) in raw {
            by_feed.insert(*feed_id, FilterSet::compile(*feed_id, patterns)?);
        }
        Ok(Self { by_feed })
    }

    pub fn for_feed(&self, feed_id: FeedId) -> Option<&FilterSet> {
        self.by_feed.get(&feed_id)
    }

    pub fn first_match(&self, feed_id: FeedId, body_text: &str) -> Option<&str> {
        self.for_feed(feed_id)
            .and_then(|filters| filters.first_match(body_text))
    }
}
