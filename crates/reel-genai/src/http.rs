//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::{GenError, GenResult};

/// Connection settings for one stage's client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle keep-alive connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 5,
        }
    }
}

impl HttpClientConfig {
    /// Long-running uploads and polls.
    pub fn long_running() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            ..Self::default()
        }
    }

    pub fn build(&self) -> GenResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()
            .map_err(GenError::Network)
    }
}

/// Pass successful responses through, turn the rest into [`GenError::Http`].
pub async fn check_status(response: Response) -> GenResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GenError::from_status(status.as_u16(), &body))
}

/// Trim a trailing slash so paths can be appended with `format!`.
pub(crate) fn normalize_base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_string()
}
