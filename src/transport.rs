//! Pluggable HTTP transport.
//!
//! All protocol logic in this crate goes through the [`Transport`] trait so it
//! never depends on a concrete HTTP implementation. [`ReqwestTransport`] is
//! the default; tests or embedders with their own HTTP stack can provide a
//! different one via [`crate::EduClient::with_transport`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{EduError, EduResult};

/// Transport error code for a connect failure or timeout.
pub const TRANSPORT_FAILED: i32 = 1;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Options for a single request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method, GET by default.
    pub method: Method,

    /// Request headers as name/value pairs.
    pub headers: Vec<(String, String)>,

    /// Request body, if any.
    pub body: Option<String>,

    /// Connect and overall timeout for the call.
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Uniform result of a remote call.
///
/// A non-2xx status is never a transport error; higher layers inspect
/// `transport_error` and `status` together and decide themselves.
#[derive(Debug, Clone)]
pub struct RequestResult {
    /// Raw response body, empty if the transport failed.
    pub content: String,

    /// Transport-level error code, 0 when the HTTP exchange completed.
    pub transport_error: i32,

    /// HTTP status code, 0 if no response was received.
    pub status: u16,
}

impl RequestResult {
    /// Whether the HTTP exchange completed with the given status.
    pub fn is_status(&self, status: u16) -> bool {
        self.transport_error == 0 && self.status == status
    }
}

/// Capability contract for issuing an HTTP request.
///
/// Implementations must be safe for concurrent use; the client issues calls
/// from multiple tasks without serialization.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Execute a request and return a uniform result.
    ///
    /// Transport failures (connect error, timeout) are reported inside the
    /// [`RequestResult`], not as an `Err`; `Err` is reserved for misuse such
    /// as an invalid URL.
    async fn execute(&self, url: &str, options: RequestOptions) -> EduResult<RequestResult>;
}

/// Default transport backed by [`reqwest`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given connect timeout.
    ///
    /// The overall timeout is applied per request from [`RequestOptions`].
    pub fn new(connect_timeout: Duration) -> EduResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| EduError::Network {
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, url: &str, options: RequestOptions) -> EduResult<RequestResult> {
        let method = reqwest::Method::from_bytes(options.method.as_str().as_bytes())
            .map_err(|e| EduError::Network {
                message: format!("invalid HTTP method: {e}"),
            })?;

        let mut request = self.client.request(method, url).timeout(options.timeout);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(body) = options.body {
            request = request.body(body);
        }

        debug!(url = %url, method = options.method.as_str(), "executing request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "transport failure");
                return Ok(RequestResult {
                    content: String::new(),
                    transport_error: TRANSPORT_FAILED,
                    status: 0,
                });
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(content) => Ok(RequestResult {
                content,
                transport_error: 0,
                status,
            }),
            Err(e) => {
                warn!(url = %url, error = %e, "failed to read response body");
                Ok(RequestResult {
                    content: String::new(),
                    transport_error: TRANSPORT_FAILED,
                    status,
                })
            }
        }
    }
}

/// Transport returning canned results, for unit tests of the protocol logic.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct StaticTransport {
    results: std::sync::Mutex<Vec<RequestResult>>,
    pub requests: std::sync::Mutex<Vec<(String, RequestOptions)>>,
}

#[cfg(test)]
impl StaticTransport {
    pub fn replying(content: &str, transport_error: i32, status: u16) -> Self {
        Self::with_results(vec![RequestResult {
            content: content.to_string(),
            transport_error,
            status,
        }])
    }

    /// Results are served in order; the last one repeats.
    pub fn with_results(results: Vec<RequestResult>) -> Self {
        Self {
            results: std::sync::Mutex::new(results),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for StaticTransport {
    async fn execute(&self, url: &str, options: RequestOptions) -> EduResult<RequestResult> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), options));
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            Ok(results.remove(0))
        } else {
            Ok(results[0].clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = RequestOptions::default();
        assert_eq!(options.method, Method::Get);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert!(options.headers.is_empty());
        assert!(options.body.is_none());
    }

    #[test]
    fn status_check_requires_transport_success() {
        let ok = RequestResult {
            content: "{}".into(),
            transport_error: 0,
            status: 200,
        };
        assert!(ok.is_status(200));

        let failed = RequestResult {
            content: String::new(),
            transport_error: TRANSPORT_FAILED,
            status: 200,
        };
        assert!(!failed.is_status(200));
    }
}
