//! HTTP Client Module
//!
//! Feed downloads go through a reqwest client with exponential backoff and
//! jitter on transient failures. Concurrency is capped by the harvester, not
//! here.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{IngestionError, Result};

/// Feed download settings
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request budget per attempt
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    /// First backoff delay, doubled per retry up to `max_retry_delay`
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            user_agent: format!("Perception-Ingestion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.http_max_retries,
            user_agent: config.http_user_agent.clone(),
            ..Default::default()
        }
    }
}

/// HTTP client with retries (exponential backoff + jitter)
#[derive(Clone)]
pub struct ResilientHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, config })
    }

    /// GETs a URL, retrying retryable statuses and transient transport errors
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!(url = %url, "Executing HTTP request");

        let mut attempt = 0u32;
        let mut delay = self.config.initial_retry_delay;
        let max_retries = self.config.max_retries;

        loop {
            attempt += 1;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        debug!(status = %status, attempt, "Request succeeded");
                        return Ok(response);
                    } else if Self::is_retryable_status(status) && attempt <= max_retries {
                        warn!(status = %status, attempt, max_retries, "Retryable error, will retry");
                        delay = self.backoff(delay).await;
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(IngestionError::ApiError {
                            code: status.to_string(),
                            message: body.chars().take(200).collect(),
                        });
                    }
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt <= max_retries {
                        warn!(error = %e, attempt, "Transient error, will retry");
                        delay = self.backoff(delay).await;
                    } else {
                        return Err(IngestionError::HttpError(e));
                    }
                }
            }
        }
    }

    /// Sleeps a jittered delay and returns the next one
    async fn backoff(&self, delay: Duration) -> Duration {
        // Jitter: random factor between 0.5 and 1.5
        let jitter = 0.5 + rand::random::<f64>();
        tokio::time::sleep(Duration::from_secs_f64(delay.as_secs_f64() * jitter)).await;
        std::cmp::min(delay * 2, self.config.max_retry_delay)
    }

    /// Throttling, gateway and timeout statuses
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS |     // 429
            StatusCode::SERVICE_UNAVAILABLE |   // 503
            StatusCode::GATEWAY_TIMEOUT |       // 504
            StatusCode::BAD_GATEWAY |           // 502
            StatusCode::REQUEST_TIMEOUT         // 408
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_service_config() {
        let config = Config {
            http_max_retries: 5,
            ..Config::default()
        };
        let http = HttpClientConfig::from_config(&config);
        assert_eq!(http.max_retries, 5);
        assert!(http.user_agent.starts_with("Perception-Ingestion/"));
    }

    #[test]
    fn test_retryable_status() {
        assert!(ResilientHttpClient::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(ResilientHttpClient::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!ResilientHttpClient::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!ResilientHttpClient::is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
