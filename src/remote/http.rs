use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::FetchError;
use crate::remote::RemoteFetcher;

/// Maximum accepted body size (2 MB).
///
/// Component files are small text documents; anything larger is not a
/// component file.
const MAX_RESPONSE_SIZE: usize = 2 * 1024 * 1024;

/// [`RemoteFetcher`] backed by `reqwest`.
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("suite-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            max_bytes: MAX_RESPONSE_SIZE,
        })
    }

    #[cfg(test)]
    fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

fn map_send_error(url: &str, timeout: Duration, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        // The timeout covers connect, headers and body.
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_send_error(url, timeout, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(url = %url, status = status.as_u16(), "Remote resource unavailable");
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_bytes
        {
            return Err(FetchError::Network {
                url: url.to_string(),
                reason: format!(
                    "Content-Length ({len} bytes) exceeds maximum allowed size ({} bytes)",
                    self.max_bytes
                ),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_send_error(url, timeout, e))?;

        if body.len() > self.max_bytes {
            return Err(FetchError::Network {
                url: url.to_string(),
                reason: format!(
                    "response body exceeds maximum allowed size ({} bytes)",
                    self.max_bytes
                ),
            });
        }
        if body.is_empty() {
            return Err(FetchError::Network {
                url: url.to_string(),
                reason: "empty response body".to_string(),
            });
        }

        Ok(body.to_vec())
    }
}
