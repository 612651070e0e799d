use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 2;
const MAX_BACKOFF_SHIFT: u32 = 6;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Retrieves one listing page as text.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    http: reqwest::Client,
    retries: u32,
}

impl HttpPageFetcher {
    pub fn from_env() -> Result<Self> {
        let timeout_secs = std::env::var("NEWS_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("NEWS_FETCH_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(Self::headers())
            .build()
            .context("failed to build news http client")?;

        Ok(Self { http, retries })
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers
    }

    async fn fetch_once(&self, url: &str) -> Result<(StatusCode, String)> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("news request failed: {url}"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read news page body: {url}"))?;
        Ok((status, text))
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.fetch_once(url).await {
                Ok((status, text)) if status.is_success() => return Ok(text),
                Ok((status, _)) => {
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    let err = anyhow::anyhow!("news page HTTP {status}: {url}");
                    if !retryable {
                        return Err(err);
                    }
                    err
                }
                Err(err) => err,
            };

            if attempt >= self.retries {
                return Err(err);
            }
            let backoff = retry_backoff(attempt);
            tracing::warn!(attempt, ?backoff, url, error = %err, "news page fetch failed; retrying");
            tokio::time::sleep(backoff).await;
        }
    }
}

/// 1s, 2s, 4s, ... capped at 64s.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT))
}
