use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use crate::core::error::ResolutionError;

/// Exponential backoff for transient failures.
///
/// `attempts` counts the first try, so the default of four sleeps 500ms,
/// 1s and 2s between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based): base, 2x base, 4x base...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt)
    }
}

/// Rate-limited, retrying GET client shared by the remote resolvers and the
/// artifact downloader.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Client, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GET `url` and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<T, ResolutionError> {
        let response = self.get(url, headers).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ResolutionError::Upstream {
            url: url.to_string(),
            status: 200,
            message: format!("invalid JSON payload: {e}"),
        })
    }

    /// GET with rate limiting and retries.
    ///
    /// Network errors, timeouts, 5xx and 429 are retried with backoff.
    /// Any other non-success status fails immediately with the body text.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<Response, ResolutionError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_error: Option<ResolutionError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay(attempt - 1);
                debug!("Retrying {} in {:?} (attempt {}/{})", url, delay, attempt + 1, attempts);
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => status_error(url, response).await,
                Err(err) => ResolutionError::Network(err),
            };

            if !error.is_transient() {
                return Err(error);
            }
            warn!("Transient failure fetching {}: {}", url, error);
            last_error = Some(error);
        }

        Err(match last_error {
            Some(ResolutionError::Upstream { status: 429, .. }) => {
                ResolutionError::RateLimited(host_of(url))
            }
            Some(err) => err,
            None => ResolutionError::Upstream {
                url: url.to_string(),
                status: 0,
                message: "no attempts made".into(),
            },
        })
    }
}

async fn status_error(url: &str, response: Response) -> ResolutionError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        truncate(body.trim(), 300)
    };
    if status == StatusCode::NOT_FOUND {
        debug!("{} returned 404", url);
    }
    ResolutionError::Upstream {
        url: url.to_string(),
        status: status.as_u16(),
        message,
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
