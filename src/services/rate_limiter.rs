//! Rate limiting and retry logic for outbound HTTP calls
//!
//! Both the media server and the chat platform are reached through a
//! [RateLimitedClient] so a library fan-out or a burst of edits cannot
//! overwhelm either side. Transient failures are retried with [retry_async].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::error::Error;

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: String,
}

impl RateLimitedClient {
    /// Create a new rate-limited client whose requests time out after `timeout`
    pub fn new(name: &str, config: RateLimitConfig, timeout: Duration) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jellyfin-status/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            name: name.to_string(),
        })
    }

    /// Client for the Jellyfin API
    pub fn for_jellyfin(timeout: Duration) -> Result<Self> {
        // Local media servers cope with a fair amount, but a large library
        // fan-out should still not hammer a small NAS
        Self::new(
            "jellyfin",
            RateLimitConfig {
                requests_per_second: 10,
                burst_size: 20,
            },
            timeout,
        )
    }

    /// Client for the Discord REST API
    pub fn for_discord(timeout: Duration) -> Result<Self> {
        // Discord's global limit is 50/sec; a status board needs a tiny fraction
        Self::new(
            "discord",
            RateLimitConfig {
                requests_per_second: 5,
                burst_size: 5,
            },
            timeout,
        )
    }

    /// Wait for rate limit and make a GET request with headers and query parameters
    pub async fn get_with_headers_and_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &T,
    ) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(client = %self.name, url = %url, "Making rate-limited GET request with headers and query");

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request
            .query(query)
            .send()
            .await
            .context("HTTP request failed")
    }

    /// Wait for rate limit and start a request with an arbitrary method
    pub async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.wait_for_permit().await;
        debug!(client = %self.name, method = %method, url = %url, "Making rate-limited request");
        self.client.request(method, url)
    }

    /// Get a reference to the underlying client for custom requests
    /// (caller is responsible for calling wait_for_permit first)
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying only while the error is transient.
///
/// A rate-limit error carrying a `Retry-After` hint waits for that long
/// instead of the backoff interval.
pub async fn retry_async<T, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempts >= config.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let hinted = match &e {
                    // Server hints are capped like computed backoff
                    Error::RateLimited { retry_after } => {
                        retry_after.map(|d| d.min(config.max_interval))
                    }
                    _ => None,
                };

                if let Some(duration) = hinted.or_else(|| backoff.next_backoff()) {
                    let retry_ms: u128 = duration.as_millis();
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = retry_ms,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

/// Helper trait for classifying HTTP responses
pub trait ResponseExt {
    /// Check if the response indicates rate limiting (429)
    fn is_rate_limited(&self) -> bool;

    /// Parse `Retry-After` (seconds, possibly fractional) if present
    fn retry_after(&self) -> Option<Duration>;
}

impl ResponseExt for Response {
    fn is_rate_limited(&self) -> bool {
        self.status().as_u16() == 429
    }

    fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.headers())
    }
}

/// First usable rate-limit delay header. Values that do not fit a
/// [Duration] are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok()?.parse::<f64>().ok())
        .find_map(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::Resource;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 1.0,
        }
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_second, 2);
        assert_eq!(config.burst_size, 5);
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("Retry-After", "1.5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_retry_after_ignores_unrepresentable_values() {
        for raw in ["1e30", "-3", "NaN", "inf", "soon"] {
            let mut headers = HeaderMap::new();
            headers.insert("Retry-After", raw.parse().unwrap());
            assert_eq!(parse_retry_after(&headers), None, "Retry-After: {raw}");
        }

        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", "1e30".parse().unwrap());
        headers.insert("X-RateLimit-Reset-After", "0.25".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_huge_retry_hint_is_capped() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let config = RetryConfig {
            max_interval: Duration::from_millis(5),
            ..fast_retry()
        };
        let started = std::time::Instant::now();
        let result = retry_async(
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::RateLimited {
                        retry_after: Some(Duration::from_secs(3600)),
                    })
                } else {
                    Ok(())
                }
            },
            &config,
            "test",
        )
        .await;
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_async(
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::destination("502 Bad Gateway"))
                } else {
                    Ok(7)
                }
            },
            &fast_retry(),
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_never_repeats_not_found() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), Error> = retry_async(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::DestinationNotFound(Resource::Message))
            },
            &fast_retry(),
            "test",
        )
        .await;
        assert!(result.unwrap_err().is_message_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), Error> = retry_async(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::RateLimited {
                    retry_after: Some(Duration::from_millis(1)),
                })
            },
            &fast_retry(),
            "test",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
