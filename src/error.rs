//! Error types for the edu-sharing client.

/// Errors surfaced by the client.
///
/// No operation retries or recovers locally; every failure is returned to the
/// caller as one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum EduError {
    /// The configured app id contains characters outside `[A-Za-z0-9._-]`.
    #[error("the given app id contains invalid characters or symbols: {app_id:?}")]
    InvalidAppId { app_id: String },

    /// Configuration error other than the app id.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Key material could not be loaded or a crypto primitive failed.
    #[error("crypto error: {message}")]
    Crypto { message: String },

    /// The repository returned an empty body, typically a connect timeout.
    ///
    /// Raised before any JSON parsing is attempted, so a dead repository never
    /// shows up as a misleading parse error.
    #[error("no answer from repository. Possibly a timeout while trying to connect to {base_url}")]
    NoResponse { base_url: String },

    /// The response body was not valid JSON.
    #[error("malformed response from repository: {message}")]
    MalformedResponse { message: String },

    /// The repository rejected an app-auth attempt.
    ///
    /// The message has already been rewritten through the known-error table,
    /// see [`crate::auth::explain_app_auth_message`].
    #[error("app authentication failed: {message}")]
    AppAuth { message: String },

    /// The usage no longer exists (or the node is not otherwise public).
    #[error("{message}")]
    UsageDeleted { message: String },

    /// The node behind a usage has been deleted.
    #[error("{message}")]
    NodeDeleted { message: String },

    /// The presented ticket is no longer valid.
    #[error("the given ticket is not valid anymore")]
    TicketInvalid,

    /// The remote repository version does not satisfy the required minimum.
    #[error("{message}")]
    Incompatible { message: String },

    /// Any other non-success outcome of a remote call.
    #[error("{operation} failed {status}: {error} {message}")]
    Remote {
        operation: &'static str,
        status: u16,
        error: String,
        message: String,
    },

    /// Transport-level failure (client construction, connection error).
    #[error("network error: {message}")]
    Network { message: String },
}

impl EduError {
    /// HTTP status an HTTP-facing wrapper should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UsageDeleted { .. } | Self::NodeDeleted { .. } => 404,
            Self::AppAuth { .. } | Self::TicketInvalid => 401,
            _ => 500,
        }
    }

    /// Whether the error is fatal misconfiguration rather than a remote outcome.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidAppId { .. } | Self::Config { .. } | Self::Crypto { .. }
        )
    }
}

/// Result type for client operations.
pub type EduResult<T> = Result<T, EduError>;
