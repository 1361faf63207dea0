use async_trait::async_trait;
use propcrawl_core::{CrawlError, FetchConfig, HeaderProfile, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// A failed fetch, split by whether trying again can help.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },
    #[error("terminal failure fetching {url}: {reason}")]
    Terminal { url: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    fn transient(url: &Url, reason: impl ToString) -> Self {
        FetchError::Transient {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    fn terminal(url: &Url, reason: impl ToString) -> Self {
        FetchError::Terminal {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Anything that can turn a URL into a page body.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<String, FetchError>;
}

/// Capped exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig, profile: &HeaderProfile) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &profile.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                CrawlError::Config(format!("invalid header name {}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                CrawlError::Config(format!("invalid value for header {}: {}", name, e))
            })?;
            headers.insert(name, value);
        }
        if let Some(cookie) = profile.resolve_cookie()? {
            let mut value = HeaderValue::from_str(&cookie).map_err(|e| {
                CrawlError::Config(format!("invalid cookie header: {}", e))
            })?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::from(config),
        })
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))
    }
}

fn classify_status(url: &Url, status: StatusCode) -> FetchError {
    let reason = format!("HTTP {}", status);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::transient(url, reason)
    } else {
        FetchError::terminal(url, reason)
    }
}

fn classify_reqwest_error(url: &Url, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() || error.is_connect() {
        FetchError::transient(url, error)
    } else if error.is_decode() || error.is_builder() || error.is_redirect() {
        FetchError::terminal(url, error)
    } else {
        // Remaining request/body errors are network level (reset, closed early).
        FetchError::transient(url, error)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    debug!("Fetched {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(error) if error.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        error,
                        attempt,
                        self.retry.max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
