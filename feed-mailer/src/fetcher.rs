use crate::types::{FetchConfig, FetchError};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Downloads raw feed documents over HTTP(S), or reads them from `file://` URLs.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url)?;

        match parsed.scheme() {
            "http" | "https" => self.fetch_http(url).await,
            "file" => Self::read_file(&parsed).await,
            other => Err(FetchError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }

    async fn read_file(url: &Url) -> Result<String, FetchError> {
        let path = url.to_file_path().map_err(|_| FetchError::UnsupportedScheme {
            scheme: format!("{} (not a local path)", url.scheme()),
        })?;
        debug!("Reading feed from {}", path.display());
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn fetch_http(&self, url: &str) -> Result<String, FetchError> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            let error = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return self.read_body(url, response, start_time).await;
                    }

                    let error = FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    if !is_transient(status) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => FetchError::Http(e),
            };

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    attempt += 1;
                    warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt, url, delay, error);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            error!("Failed to fetch feed after {} attempts: {}", attempt + 1, url);
            return Err(error);
        }
    }

    async fn read_body(
        &self,
        url: &str,
        response: reqwest::Response,
        start_time: Instant,
    ) -> Result<String, FetchError> {
        let limit_mb = self.config.max_feed_size_mb;

        if let Some(content_length) = response.content_length() {
            let size_mb = content_length as usize / (1024 * 1024);
            if size_mb > limit_mb {
                return Err(FetchError::FeedTooLarge { size_mb });
            }
        }

        let content = response.text().await?;
        let size_mb = content.len() / (1024 * 1024);
        if size_mb > limit_mb {
            return Err(FetchError::FeedTooLarge { size_mb });
        }

        info!(
            "Fetched feed: {} ({} bytes in {}ms)",
            url,
            content.len(),
            start_time.elapsed().as_millis()
        );
        Ok(content)
    }
}

/// Server-side and throttling failures are worth another attempt; other client errors are not.
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
