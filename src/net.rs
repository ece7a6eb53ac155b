//! Network plumbing shared by the revocation resolver and the TSA client.
//!
//! Only these two collaborators block on I/O. Both go through a
//! [`HttpTransport`] and wrap their calls in a [`RetryPolicy`], which retries
//! transport failures with exponential backoff and never retries anything
//! else.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use std::time::Duration;

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each failed attempt
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the initial delay.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor).min(self.max_backoff)
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// Cancellation is checked before every attempt.
    pub fn run<T>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            cancel.check()?;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Username and password for HTTP basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Blocking HTTP used for OCSP, CRL and timestamp requests.
pub trait HttpTransport: Send + Sync {
    /// POST `body` and return the response body of a 2xx reply.
    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
        credentials: Option<&Credentials>,
    ) -> Result<Vec<u8>>;

    /// GET `url` and return the response body of a 2xx reply.
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpTransport`] backed by a blocking `reqwest` client.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl ReqwestTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf_seal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    fn finish(url: &str, response: reqwest::Result<reqwest::blocking::Response>) -> Result<Vec<u8>> {
        let network = |reason: String| Error::Network {
            url: url.to_string(),
            reason,
        };
        let response = response.map_err(|e| network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(network(format!("HTTP status {}", response.status())));
        }
        let body = response.bytes().map_err(|e| network(format!("reading body: {}", e)))?;
        Ok(body.to_vec())
    }
}

#[cfg(feature = "http")]
impl HttpTransport for ReqwestTransport {
    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
        credentials: Option<&Credentials>,
    ) -> Result<Vec<u8>> {
        log::debug!("POST {} ({} bytes, {})", url, body.len(), content_type);
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", content_type)
            .body(body.to_vec());
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        Self::finish(url, request.send())
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        log::debug!("GET {}", url);
        Self::finish(url, self.client.get(url).send())
    }
}
