//! REST fetcher for the Tunewatch API.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tunewatch_core::{CacheKey, FetchError};

use crate::error::ClientResult;
use crate::query_cache::QueryFetcher;

/// Longest upstream error body echoed into a [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.read_json(response).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, FetchError> {
        self.send_json(reqwest::Method::POST, path, body)
            .await
            .map(|(_, value)| value)
    }

    /// Send `body` with any method, returning the 2xx status with the payload.
    ///
    /// An empty success body (e.g. `204 No Content`) reads as `null`.
    pub async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<(u16, Value), FetchError> {
        let response = self
            .http
            .request(method, self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        if status == 204 {
            return Ok((status, Value::Null));
        }
        self.read_json(response).await.map(|value| (status, value))
    }

    /// Whether the backend answers `path` with a 2xx inside `timeout`.
    pub async fn probe(&self, path: &str, timeout: Duration) -> bool {
        match self.http.get(self.url(path)).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, "connectivity probe failed");
                false
            }
        }
    }

    /// A [`QueryFetcher`] that GETs `path`.
    pub fn endpoint(&self, path: impl Into<String>) -> EndpointFetcher {
        EndpointFetcher {
            client: self.clone(),
            path: path.into(),
            body: None,
        }
    }

    /// A [`QueryFetcher`] that POSTs `body` to `path`.
    pub fn post_endpoint(&self, path: impl Into<String>, body: Value) -> EndpointFetcher {
        EndpointFetcher {
            client: self.clone(),
            path: path.into(),
            body: Some(body),
        }
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(FetchError::status(status.as_u16(), message));
        }
        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                FetchError::InvalidResponse {
                    reason: e.to_string(),
                }
            } else {
                self.map_error(e)
            }
        })
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FetchError::network(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointFetcher {
    client: ApiClient,
    path: String,
    body: Option<Value>,
}

#[async_trait]
impl QueryFetcher for EndpointFetcher {
    async fn fetch(&self, _key: &CacheKey) -> Result<Value, FetchError> {
        match &self.body {
            Some(body) => self.client.post_json(&self.path, body).await,
            None => self.client.get_json(&self.path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.url("/api/radios"), "http://localhost:3000/api/radios");
        assert_eq!(client.url("health/ping"), "http://localhost:3000/health/ping");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = client.get_json("/api/radios").await.unwrap_err();
        assert!(err.is_retryable());
        let write = client
            .send_json(reqwest::Method::PUT, "/api/radios/1", &serde_json::json!({"online": false}))
            .await;
        assert!(write.unwrap_err().is_retryable());
        assert!(!client.probe("/health/ping", Duration::from_millis(500)).await);
    }
}
