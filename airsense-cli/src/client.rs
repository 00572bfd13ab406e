//! HTTP client for the Airsense API with fixed-interval retry.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|source| ClientError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            retry,
        })
    }

    /// Absolute URL for `path`; full URLs pass through untouched.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// POST a JSON body, retrying until a 200/201 comes back or attempts run out.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Value, ClientError> {
        let url = self.url(path);
        Retry::spawn(self.strategy(), || self.post_once(&url, body)).await
    }

    /// GET a JSON document with the same retry policy.
    pub async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        let url = self.url(path);
        Retry::spawn(self.strategy(), || self.get_once(&url)).await
    }

    /// Single GET, returning whatever status the server answers with.
    pub async fn get_status(&self, path: &str) -> Result<u16, ClientError> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport { url, source })?;
        Ok(resp.status().as_u16())
    }

    fn strategy(&self) -> std::iter::Take<FixedInterval> {
        FixedInterval::new(self.retry.delay).take(self.retry.attempts.saturating_sub(1))
    }

    async fn post_once<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<Value, ClientError> {
        let result = self.http.post(url).json(body).send().await;
        self.finish(url, result).await
    }

    async fn get_once(&self, url: &str) -> Result<Value, ClientError> {
        let result = self.http.get(url).send().await;
        self.finish(url, result).await
    }

    async fn finish(
        &self,
        url: &str,
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value, ClientError> {
        let resp = result.map_err(|source| {
            tracing::warn!(url, error = %source, "Request failed");
            ClientError::Transport {
                url: url.to_string(),
                source,
            }
        })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|source| ClientError::Transport {
            url: url.to_string(),
            source,
        })?;

        if status != 200 && status != 201 {
            tracing::warn!(url, status, "Unexpected response status");
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
