use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Abstraction over fetching a resource by URL.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the full body behind `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// Builder for [`HttpFetcher`].
#[derive(Default)]
pub struct HttpFetcherBuilder {
    client: Option<Client>,
    timeout: Option<Duration>,
}

impl HttpFetcherBuilder {
    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Per-request timeout applied when the client is built here.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the fetcher.
    pub fn build(self) -> Result<HttpFetcher> {
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = Client::builder().user_agent("hot-updater");
                if let Some(timeout) = self.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build()?
            }
        };
        Ok(HttpFetcher { client })
    }
}

/// Fetcher backed by reqwest that also serves `file://` URLs from disk.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new builder.
    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let parsed = Url::parse(url)
            .map_err(|err| UpdaterError::validation(format!("invalid url {url}: {err}")))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| UpdaterError::validation(format!("invalid file url {url}")))?;
            let data = tokio::fs::read(&path)
                .await
                .map_err(|err| UpdaterError::Network {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            return Ok(Bytes::from(data));
        }

        let response = self.client.get(parsed).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts per logical fetch.
    pub attempts: u32,
    /// Pause between two attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Pause between two attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Fetch `url`, retrying up to `policy.attempts` times.
///
/// `accept` validates a fetched body; a rejected body counts as a failed
/// attempt. Errors that are not [transient](UpdaterError::is_transient) are
/// returned at once. Otherwise the last error is logged and replaced by
/// [`UpdaterError::RetriesExhausted`].
pub async fn fetch_with_retry<F, A>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
    accept: A,
) -> Result<Bytes>
where
    F: AssetFetcher + ?Sized,
    A: Fn(&Bytes) -> Result<()>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        let outcome = match fetcher.fetch(url).await {
            Ok(body) => accept(&body).map(|_| body),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(body) => return Ok(body),
            Err(err) if !err.is_transient() => {
                tracing::warn!(url, attempt, error = %err, "fetch failed permanently");
                return Err(err);
            }
            Err(err) => {
                tracing::debug!(url, attempt, error = %err, "fetch attempt failed");
                if attempt < attempts {
                    tokio::time::sleep(policy.delay()).await;
                } else {
                    tracing::warn!(url, attempts, error = %err, "giving up on fetch");
                }
            }
        }
    }

    Err(UpdaterError::RetriesExhausted {
        url: url.to_string(),
        attempts,
    })
}

/// Append a random `spm` query parameter so caches never serve a stale copy.
pub fn cache_busted(url: &str) -> String {
    let nonce: f64 = rand::thread_rng().gen();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}spm={nonce}")
}
