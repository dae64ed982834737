pub mod types;
pub mod traits;
pub mod feed_manager;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod filter;
pub mod composer;
pub mod dispatcher;
pub mod ledger;
pub mod pipeline;

pub use types::*;
pub use traits::{FeedSource, MailTransport, SubscriptionStore};
pub use feed_manager::FeedManager;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use sources::RssFeedSource;
pub use filter::{FilterBook, FilterSet};
pub use composer::{MailMessage, MessageComposer};
pub use dispatcher::{transport_for, Dispatcher, SendmailTransport, StdoutTransport};
pub use ledger::DedupLedger;
pub use pipeline::{FeedOutcome, FeedPipeline, FeedReport, PassReport};
