//! Origin Fetcher - Network Source
//!
//! Downloads a payload with one HTTP GET. The lookup key doubles as the
//! address. A single total timeout covers connect, headers and body.
//! There are no retries; the resolver decides what a failure means.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::decode::decode_payload;
use super::entry::LookupKey;
use super::DEFAULT_FETCH_TIMEOUT;
use crate::domain::ports::OriginFetcher;
use crate::error::{Error, FetchError, Result};

/// Origin fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Total request timeout
    #[serde(with = "crate::config::secs")]
    pub timeout: Duration,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Largest accepted response body, if bounded
    pub max_body_bytes: Option<u64>,
    /// Reject payloads without a known image signature
    pub verify_image: bool,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: concat!("tierfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: None,
            verify_image: true,
        }
    }
}

/// HTTP origin backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpOriginFetcher {
    client: Client,
    config: OriginConfig,
}

impl HttpOriginFetcher {
    /// Create a fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(OriginConfig::default())
    }

    /// Create a fetcher from configuration
    pub fn with_config(config: OriginConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get configuration
    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    fn parse_address(key: &LookupKey) -> std::result::Result<Url, FetchError> {
        let url = Url::parse(key.as_str()).map_err(|e| FetchError::InvalidAddress {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(FetchError::InvalidAddress {
                key: key.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    fn classify(&self, key: &LookupKey, err: reqwest::Error) -> FetchError {
        let key = key.to_string();
        if err.is_timeout() {
            FetchError::Timeout {
                key,
                after: self.config.timeout,
            }
        } else if err.is_connect() {
            FetchError::Connect {
                key,
                reason: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            FetchError::Body {
                key,
                reason: err.to_string(),
            }
        } else {
            FetchError::Connect {
                key,
                reason: err.to_string(),
            }
        }
    }

    async fn read_body(
        &self,
        key: &LookupKey,
        mut response: reqwest::Response,
    ) -> std::result::Result<Bytes, FetchError> {
        let limit = match self.config.max_body_bytes {
            Some(limit) => limit,
            None => return response.bytes().await.map_err(|e| self.classify(key, e)),
        };

        let too_large = || FetchError::TooLarge {
            key: key.to_string(),
            limit,
        };

        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(key, e))? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn fetch(&self, key: &LookupKey) -> std::result::Result<Bytes, FetchError> {
        let url = Self::parse_address(key)?;

        debug!("Sending origin request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(key, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        let body = self.read_body(key, response).await?;
        let (payload, format) = decode_payload(key.as_str(), body, self.config.verify_image)?;
        debug!(bytes = payload.len(), format = %format, "Origin responded");

        Ok(payload)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    /// Serve one canned HTTP response per connection, after `delay`
    async fn serve(status: &'static str, body: &'static [u8], delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}/img/a.png", addr)
    }

    fn key(s: &str) -> LookupKey {
        LookupKey::new(s).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = OriginConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.verify_image);
        assert!(config.user_agent.starts_with("tierfetch/"));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let url = serve("200 OK", PNG, Duration::ZERO).await;
        let fetcher = HttpOriginFetcher::new().unwrap();

        let payload = fetcher.fetch(&key(&url)).await.unwrap();
        assert_eq!(payload.as_ref(), PNG);
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let url = serve("404 Not Found", b"missing", Duration::ZERO).await;
        let fetcher = HttpOriginFetcher::new().unwrap();

        assert_matches!(
            fetcher.fetch(&key(&url)).await,
            Err(FetchError::Status { status: 404, .. })
        );
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let url = serve("200 OK", PNG, Duration::from_secs(5)).await;
        let fetcher = HttpOriginFetcher::with_config(OriginConfig {
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();

        let err = fetcher.fetch(&key(&url)).await.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_fetch_connect_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpOriginFetcher::new().unwrap();
        let url = format!("http://{}/a.png", addr);
        assert_matches!(
            fetcher.fetch(&key(&url)).await,
            Err(FetchError::Connect { .. })
        );
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_image() {
        let url = serve("200 OK", b"<html>not an image</html>", Duration::ZERO).await;
        let fetcher = HttpOriginFetcher::new().unwrap();
        assert_matches!(
            fetcher.fetch(&key(&url)).await,
            Err(FetchError::Decode { .. })
        );

        let lenient = HttpOriginFetcher::with_config(OriginConfig {
            verify_image: false,
            ..Default::default()
        })
        .unwrap();
        assert!(lenient.fetch(&key(&url)).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_body() {
        let url = serve("200 OK", b"", Duration::ZERO).await;
        let fetcher = HttpOriginFetcher::new().unwrap();
        assert_matches!(
            fetcher.fetch(&key(&url)).await,
            Err(FetchError::Decode { .. })
        );
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let url = serve("200 OK", PNG, Duration::ZERO).await;
        let fetcher = HttpOriginFetcher::with_config(OriginConfig {
            max_body_bytes: Some(4),
            ..Default::default()
        })
        .unwrap();
        assert_matches!(
            fetcher.fetch(&key(&url)).await,
            Err(FetchError::TooLarge { limit: 4, .. })
        );
    }

    #[tokio::test]
    async fn test_invalid_addresses() {
        let fetcher = HttpOriginFetcher::new().unwrap();

        assert_matches!(
            fetcher.fetch(&key("not a url")).await,
            Err(FetchError::InvalidAddress { .. })
        );
        assert_matches!(
            fetcher.fetch(&key("file:///etc/passwd")).await,
            Err(FetchError::InvalidAddress { reason, .. }) => {
                assert!(reason.contains("file"));
            }
        );
    }
}
