//! Base client: signed headers, response plumbing, compatibility check.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{EduError, EduResult};
use crate::signing::{validate_app_id, AppSigner};
use crate::transport::{RequestOptions, RequestResult, ReqwestTransport, Transport};
use crate::types::EduConfig;

/// Minimum repository version this client speaks to.
///
/// The bound is inclusive: a repository reporting exactly this version passes.
pub const MIN_REPOSITORY_VERSION: &str = "8.0";

/// Authorization scheme used with tickets.
const AUTH_SCHEME: &str = "EDU-TICKET";

/// Shared signing and header-building capability.
///
/// Holds the immutable app identity and the transport; the operation groups
/// ([`crate::AuthClient`], [`crate::UsageClient`]) are built on top of it.
/// The client keeps no call-scoped mutable state, so it can be shared across
/// tasks freely.
#[derive(Debug, Clone)]
pub struct EduClient {
    config: EduConfig,
    signer: AppSigner,
    transport: Arc<dyn Transport>,
}

impl EduClient {
    /// Create a client with the default reqwest transport.
    ///
    /// Fails without any network access if the app id violates the restricted
    /// charset or the private key cannot be loaded.
    pub fn new(config: EduConfig) -> EduResult<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client with a custom transport implementation.
    pub fn with_transport(mut config: EduConfig, transport: Arc<dyn Transport>) -> EduResult<Self> {
        validate_app_id(&config.app_id)?;
        let signer = AppSigner::from_pem(
            &config.private_key,
            config.repository_public_key.as_deref(),
        )?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            config,
            signer,
            transport,
        })
    }

    /// The normalized base URL (no trailing slash).
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// The configured app id.
    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    /// The full configuration.
    pub fn config(&self) -> &EduConfig {
        &self.config
    }

    /// Sign an arbitrary message with the app's private key.
    pub fn sign(&self, message: &[u8]) -> EduResult<String> {
        self.signer.sign(message)
    }

    /// Encrypt a message with the repository's public key.
    pub fn encrypt(&self, message: &[u8]) -> EduResult<String> {
        self.signer.encrypt(message)
    }

    /// Build the signed header bundle for a request.
    ///
    /// `subject` is the value the signature authorizes (username, ticket,
    /// usage id, ...), so a captured signature cannot be replayed against an
    /// unrelated endpoint.
    pub fn signature_headers(&self, subject: &str) -> EduResult<Vec<(String, String)>> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let signed = format!("{}{}{}", self.config.app_id, subject, timestamp);
        let signature = self.sign(signed.as_bytes())?;
        Ok(vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Edu-App-Id".to_string(), self.config.app_id.clone()),
            ("X-Edu-App-Signed".to_string(), signed),
            ("X-Edu-App-Sig".to_string(), signature),
            ("X-Edu-App-Ts".to_string(), timestamp.to_string()),
        ])
    }

    /// Header authenticating a request with a session ticket.
    pub fn rest_authentication_header(&self, ticket: &str) -> (String, String) {
        (
            "Authorization".to_string(),
            format!("{AUTH_SCHEME} {ticket}"),
        )
    }

    /// Execute a request through the configured transport.
    pub(crate) async fn execute(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> EduResult<RequestResult> {
        self.transport.execute(url, options).await
    }

    /// Request options with the configured timeout.
    pub(crate) fn request_options(&self) -> RequestOptions {
        RequestOptions {
            timeout: Duration::from_secs(self.config.timeout_secs),
            ..RequestOptions::default()
        }
    }

    /// Empty-body guard, evaluated before any JSON parsing.
    pub(crate) fn require_body<'a>(&self, result: &'a RequestResult) -> EduResult<&'a str> {
        if result.content.is_empty() {
            return Err(EduError::NoResponse {
                base_url: self.config.base_url.clone(),
            });
        }
        Ok(&result.content)
    }

    /// Decode a response body as JSON, after the empty-body guard.
    pub(crate) fn parse_json(&self, result: &RequestResult) -> EduResult<Value> {
        let body = self.require_body(result)?;
        serde_json::from_str(body).map_err(|e| EduError::MalformedResponse {
            message: e.to_string(),
        })
    }

    /// Generic remote failure with the diagnostic fields the repository sent.
    pub(crate) fn remote_failure(
        operation: &'static str,
        result: &RequestResult,
        data: &Value,
    ) -> EduError {
        EduError::Remote {
            operation,
            status: result.status,
            error: json_str(data, "error").unwrap_or("unknown").to_string(),
            message: json_str(data, "message").unwrap_or("unknown").to_string(),
        }
    }

    /// Verify that the remote repository version satisfies
    /// [`MIN_REPOSITORY_VERSION`]. Call this once during setup.
    pub async fn verify_compatibility(&self) -> EduResult<()> {
        let url = format!("{}/rest/_about", self.config.base_url);
        debug!(url = %url, "checking repository compatibility");

        let mut options = self.request_options();
        options.headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        let result = self.execute(&url, options).await?;

        if !result.is_status(200) {
            let data = serde_json::from_str(&result.content).unwrap_or(Value::Null);
            return Err(Self::remote_failure(
                "retrieving repository version",
                &result,
                &data,
            ));
        }

        let data = self.parse_json(&result)?;
        let version_block = &data["version"];
        let repository_version =
            json_str(version_block, "repository").ok_or_else(|| EduError::MalformedResponse {
                message: "about endpoint did not report a repository version".to_string(),
            })?;

        if compare_versions(repository_version, MIN_REPOSITORY_VERSION) == Ordering::Less {
            return Err(EduError::Incompatible {
                message: format!(
                    "the version of the target repository is too low. Minimum required is {MIN_REPOSITORY_VERSION}: {version_block}"
                ),
            });
        }
        debug!(version = repository_version, "repository version accepted");
        Ok(())
    }
}

/// Borrow a string field from an open JSON map, absent if missing or non-string.
pub(crate) fn json_str<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}

/// Compare dotted version strings numerically, missing components count as 0.
fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (left, right) = (parse(left), parse(right));
    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
