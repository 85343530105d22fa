//! HTTP client for a remote registry.

use super::RegistryHandle;
use super::protocol::{
    HealthResponse, PeerKind, PeerRecord, RegisterRequest, RegisterResponse, validate_username,
};
use crate::error::RegistryError;
use crate::retry::RetryConfig;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Registry client configuration
#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    /// Registry base URL, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Retry policy for transport failures and 5xx responses
    pub retry: RetryConfig,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

impl RegistryClientConfig {
    /// Configuration for a given base URL with default timeouts
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Client for the registry HTTP surface
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl RegistryClient {
    /// Build a client
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` if the HTTP client cannot be constructed.
    pub fn new(config: RegistryClientConfig) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RegistryError::Unreachable(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    /// Registry base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, retrying transport failures and server errors
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, RegistryError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let failure = match build().send().await {
                Ok(resp) if !resp.status().is_server_error() => return Ok(resp),
                Ok(resp) => format!("HTTP {}", resp.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.retry.max_retries {
                tracing::warn!(
                    "Registry {} unreachable after {} attempts: {}",
                    self.base_url,
                    attempt + 1,
                    failure
                );
                return Err(RegistryError::Unreachable(failure));
            }

            let backoff = self.retry.backoff_duration(attempt);
            tracing::debug!(
                "Registry request failed ({}), retrying in {:?}",
                failure,
                backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Query registry health
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` if the registry does not answer.
    pub async fn health(&self) -> Result<HealthResponse, RegistryError> {
        let url = self.url("/health");
        let resp = self.send_with_retry(|| self.http.get(&url)).await?;
        decode(resp).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, RegistryError> {
    resp.json::<T>()
        .await
        .map_err(|e| RegistryError::Unreachable(format!("malformed registry response: {e}")))
}

/// Map a non-success status to the matching registry error
fn status_error(status: StatusCode, username: &str) -> RegistryError {
    match status {
        StatusCode::CONFLICT => RegistryError::DuplicateUsername(username.to_string()),
        StatusCode::NOT_FOUND => RegistryError::NotFound(username.to_string()),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RegistryError::InvalidUsername(username.to_string())
        }
        other => RegistryError::Unreachable(format!("unexpected HTTP {other}")),
    }
}

#[async_trait]
impl RegistryHandle for RegistryClient {
    async fn register(
        &self,
        username: &str,
        address: &str,
        port: u16,
        kind: PeerKind,
    ) -> Result<PeerRecord, RegistryError> {
        validate_username(username)?;

        let url = self.url("/register");
        let body = RegisterRequest {
            username: username.to_string(),
            address: address.to_string(),
            port,
            kind,
        };
        let resp = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, username));
        }

        let body: RegisterResponse = decode(resp).await?;
        body.peer
            .ok_or_else(|| RegistryError::Unreachable("register response without record".into()))
    }

    async fn heartbeat(&self, username: &str) -> Result<(), RegistryError> {
        if validate_username(username).is_err() {
            return Err(RegistryError::NotFound(username.to_string()));
        }

        let url = self.url(&format!("/heartbeat/{username}"));
        let resp = self.send_with_retry(|| self.http.post(&url)).await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            s => Err(status_error(s, username)),
        }
    }

    async fn lookup(&self, username: &str) -> Result<PeerRecord, RegistryError> {
        if validate_username(username).is_err() {
            return Err(RegistryError::NotFound(username.to_string()));
        }

        let url = self.url(&format!("/peerinfo/{username}"));
        let resp = self.send_with_retry(|| self.http.get(&url)).await?;
        match resp.status() {
            s if s.is_success() => decode(resp).await,
            s => Err(status_error(s, username)),
        }
    }

    async fn list(&self, exclude: Option<&str>) -> Result<Vec<PeerRecord>, RegistryError> {
        let url = self.url("/peers");
        let resp = self
            .send_with_retry(|| {
                let req = self.http.get(&url);
                match exclude {
                    Some(name) => req.query(&[("exclude", name)]),
                    None => req,
                }
            })
            .await?;

        match resp.status() {
            s if s.is_success() => decode(resp).await,
            s => Err(RegistryError::Unreachable(format!("unexpected HTTP {s}"))),
        }
    }

    async fn deregister(&self, username: &str) -> Result<(), RegistryError> {
        if validate_username(username).is_err() {
            return Ok(());
        }

        let url = self.url(&format!("/unregister/{username}"));
        self.send_with_retry(|| self.http.delete(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_fail_config(base_url: &str) -> RegistryClientConfig {
        RegistryClientConfig {
            base_url: base_url.to_string(),
            request_timeout: Duration::from_millis(200),
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(10),
                multiplier: 2.0,
                jitter: false,
            },
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RegistryClient::new(fast_fail_config("http://localhost:9/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9");
        assert_eq!(client.url("/health"), "http://localhost:9/health");
    }

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(
            status_error(StatusCode::CONFLICT, "bob"),
            RegistryError::DuplicateUsername("bob".into())
        );
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "bob"),
            RegistryError::NotFound("bob".into())
        );
        assert!(matches!(
            status_error(StatusCode::IM_A_TEAPOT, "bob"),
            RegistryError::Unreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_after_retries() {
        // Port 9 (discard) is closed on loopback in test environments.
        let client = RegistryClient::new(fast_fail_config("http://127.0.0.1:9")).unwrap();
        let err = client.lookup("alice").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_username_short_circuits() {
        let client = RegistryClient::new(fast_fail_config("http://127.0.0.1:9")).unwrap();
        assert!(matches!(
            client.register("a b", "h", 1, PeerKind::Cli).await,
            Err(RegistryError::InvalidUsername(_))
        ));
        assert!(matches!(
            client.lookup("a b").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
