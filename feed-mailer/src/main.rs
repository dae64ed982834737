use clap::Parser;
use feed_mailer::dispatcher::DEFAULT_SENDMAIL;
use feed_mailer::{
    FeedManager, FeedPipeline, FetchConfig, MailerError, PipelineConfig, RssFeedSource,
    SendmailTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(
    name = "feed-mailer",
    version,
    about = "Mail new feed entries to their subscribers, one pass per invocation"
)]
struct Cli {
    /// SQLite database holding feeds, subscriptions, filters and seen items.
    #[arg(short, long, env = "FEED_MAILER_DB", default_value = "data/feed-mailer.db")]
    db: PathBuf,

    /// Source email address.
    #[arg(short, long = "from", env = "FEED_MAILER_FROM")]
    from_address: Option<String>,

    /// Don't send email or update the database, and process items that have already been seen.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Path to a sendmail-compatible binary.
    #[arg(short, long, env = "FEED_MAILER_SENDMAIL", default_value = DEFAULT_SENDMAIL)]
    sendmail: PathBuf,

    #[arg(short, long)]
    verbose: bool,

    /// HTTP timeout per feed request.
    #[arg(long, default_value_t = FetchConfig::default().timeout_seconds)]
    timeout_seconds: u64,

    /// Retries for transient HTTP failures.
    #[arg(long, default_value_t = FetchConfig::default().max_retries)]
    max_retries: u32,

    #[arg(long, default_value_t = FetchConfig::default().user_agent)]
    user_agent: String,

    /// Print the pass report as JSON on stdout.
    #[arg(long)]
    json_report: bool,

    /// Create the database and its tables if missing, then exit.
    #[arg(long)]
    init_schema: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    if cli.init_schema {
        let feed_manager = FeedManager::create(&cli.db).await?;
        feed_manager.setup_schema().await?;
        info!("Initialized database {}", cli.db.display());
        return Ok(());
    }

    if !cli.db.exists() {
        error!("Database {} not found", cli.db.display());
        return Err(MailerError::Config(format!("Database {} not found", cli.db.display())).into());
    }

    let from_address = cli.from_address.ok_or_else(|| {
        MailerError::Config("From-address must be supplied with --from".to_string())
    })?;
    let config = PipelineConfig::new(from_address, cli.dry_run)?;

    let fetch_config = FetchConfig {
        user_agent: cli.user_agent,
        timeout_seconds: cli.timeout_seconds,
        max_retries: cli.max_retries,
        ..FetchConfig::default()
    };

    let feed_manager = Arc::new(FeedManager::open(&cli.db).await?);
    let source = Arc::new(RssFeedSource::new(fetch_config)?);
    let transport = Arc::new(SendmailTransport::new(cli.sendmail.into_os_string()));

    let pipeline = FeedPipeline::new(feed_manager, source, transport, config);
    let report = pipeline.run_pass().await.map_err(|e| {
        error!("Pass aborted, nothing was committed: {}", e);
        e
    })?;

    if cli.json_report {
        println!("{}", serde_json::to_string_pretty(&report).map_err(MailerError::from)?);
    }

    Ok(())
}
