//! Configuration and protocol value types.

use serde::{Deserialize, Serialize};

/// Default display language sent to the repository.
fn default_language() -> String {
    "de".to_string()
}

/// Default connect/overall timeout in seconds.
fn default_timeout() -> u64 {
    5
}

/// Client configuration.
///
/// `base_url` points at the repository in the form `http://<host>/edu-sharing`;
/// trailing slashes are stripped at client construction. The app id and
/// private key must match an application registered in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EduConfig {
    /// Repository base URL.
    pub base_url: String,

    /// Registered app id, restricted to `[A-Za-z0-9._-]+`.
    pub app_id: String,

    /// The app's private key, PEM encoded.
    pub private_key: String,

    /// The repository's public key, required only for encrypted payloads.
    #[serde(default)]
    pub repository_public_key: Option<String>,

    /// Display language for rendered snippets.
    #[serde(default = "default_language")]
    pub language: String,

    /// Connect and overall timeout per remote call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Rewriting of content/download URLs in rendering responses.
    #[serde(default)]
    pub url_handling: UrlHandling,
}

impl EduConfig {
    /// Create a configuration with the mandatory fields.
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            app_id: app_id.into(),
            private_key: private_key.into(),
            repository_public_key: None,
            language: default_language(),
            timeout_secs: default_timeout(),
            url_handling: UrlHandling::default(),
        }
    }

    /// Set the repository public key.
    pub fn with_repository_public_key(mut self, pem: impl Into<String>) -> Self {
        self.repository_public_key = Some(pem.into());
        self
    }

    /// Set the display language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the per-call timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable URL handling with the given redirect endpoint.
    pub fn with_url_handling(mut self, endpoint_url: impl Into<String>) -> Self {
        self.url_handling = UrlHandling {
            enabled: true,
            endpoint_url: endpoint_url.into(),
        };
        self
    }
}

/// Controls whether URLs in rendering responses are rewritten to redirect
/// through the caller's own endpoint.
///
/// When disabled, the caller must handle downloads and the replacement of the
/// inline helper script placeholder itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlHandling {
    /// Whether rewriting is active.
    #[serde(default)]
    pub enabled: bool,

    /// The caller's redirect endpoint, e.g. `https://lms.example/edu-redirect`.
    #[serde(default)]
    pub endpoint_url: String,
}

/// A durable binding between a repository node and a (container, resource)
/// slot in the caller's system.
///
/// Returned by [`crate::UsageClient::create_usage`]. The library never stores
/// usages; keep all fields persisted in your own system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Repository node id the usage grants access to.
    pub node_id: String,

    /// Pinned node version; `None` floats to the latest version.
    pub node_version: Option<String>,

    /// Caller-defined page/course id the usage belongs to.
    pub container_id: String,

    /// Caller-defined slot within the container.
    pub resource_id: String,

    /// Repository-issued usage id.
    pub usage_id: String,
}

/// Rendering hint for [`crate::UsageClient::get_node_by_usage`].
///
/// Only changes the returned `detailsSnippet` markup, not the node data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Inline,
    Embed,
    Dynamic,
    /// Used by redirect flows so the repository can track those views
    /// separately from inline rendering.
    Prerender,
}

impl DisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Embed => "embed",
            Self::Dynamic => "dynamic",
            Self::Prerender => "prerender",
        }
    }
}

/// Target of a redirect URL built by [`crate::UsageClient::get_redirect_url`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Inline content view; the redirect closes back into the caller's page.
    Content,
    /// Raw download of the node content.
    Download,
}

impl RedirectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Download => "download",
        }
    }
}
