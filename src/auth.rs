//! App authentication: ticket issuance and session validation.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{json_str, EduClient};
use crate::error::{EduError, EduResult};
use crate::transport::Method;

/// Known remote diagnostics and the human explanation prefixed to them.
///
/// The repository reports signing problems with fairly raw internals; these
/// rewrites tell an integrator what to actually do about them.
const KNOWN_ERRORS: &[(&str, &[&str])] = &[
    (
        "the timestamp sent by your client was too old. Please check the clocks of both servers \
         or increase the value 'message_offset_ms'/'message_send_offset_ms' in the app properties file",
        &[
            "MESSAGE SEND TIMESTAMP TO OLD",
            "MESSAGE SEND TIMESTAMP newer than MESSAGE ARRIVED TIMESTAMP",
        ],
    ),
    (
        "The ip your client is using for request is not known by the repository. Please add the \
         ip into your 'host_aliases' app properties file",
        &["INVALID_HOST"],
    ),
];

/// Rewrite a remote app-auth diagnostic through the known-error table.
///
/// Falls back to the raw message unchanged when no pattern matches.
pub fn explain_app_auth_message(message: &str) -> String {
    for (explanation, patterns) in KNOWN_ERRORS {
        if patterns.iter().any(|p| message.contains(p)) {
            return format!("{explanation}({message})");
        }
    }
    message.to_string()
}

/// Authentication operations, built on a shared [`EduClient`].
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: Arc<EduClient>,
}

impl AuthClient {
    pub fn new(client: Arc<EduClient>) -> Self {
        Self { client }
    }

    /// Exchange a username for a session ticket.
    ///
    /// The request is signed with the username as subject. `additional_fields`
    /// is sent as the JSON request body, e.g. profile data the repository
    /// should attach to a freshly created user.
    ///
    /// The repository may qualify a bare username with a domain suffix; a
    /// returned `userId` of `alice@example.org` still satisfies a request for
    /// `alice`.
    pub async fn get_ticket_for_user(
        &self,
        username: &str,
        additional_fields: Option<&Map<String, Value>>,
    ) -> EduResult<String> {
        let url = format!(
            "{}/rest/authentication/v1/appauth/{}",
            self.client.base_url(),
            urlencoding::encode(username)
        );
        debug!(url = %url, "requesting ticket");

        let mut options = self.client.request_options();
        options.method = Method::Post;
        options.headers = self.client.signature_headers(username)?;
        if let Some(fields) = additional_fields {
            options.body = Some(Value::Object(fields.clone()).to_string());
        }

        let result = self.client.execute(&url, options).await?;
        let data = self.client.parse_json(&result)?;

        let user_matches = json_str(&data, "userId")
            .map(|id| id == username || id.starts_with(&format!("{username}@")))
            .unwrap_or(false);

        if result.is_status(200) && data.get("error").is_none() && user_matches {
            return json_str(&data, "ticket")
                .map(str::to_string)
                .ok_or_else(|| EduError::MalformedResponse {
                    message: "authentication response did not contain a ticket".to_string(),
                });
        }

        match json_str(&data, "message") {
            Some(message) => Err(EduError::AppAuth {
                message: explain_app_auth_message(message),
            }),
            None => Err(EduClient::remote_failure("retrieving ticket", &result, &data)),
        }
    }

    /// Validate a ticket and return the repository's session information.
    ///
    /// The returned map is passed through verbatim; its shape evolves with the
    /// repository, so check field presence before use.
    pub async fn get_ticket_authentication_info(
        &self,
        ticket: &str,
    ) -> EduResult<Map<String, Value>> {
        let url = format!(
            "{}/rest/authentication/v1/validateSession",
            self.client.base_url()
        );
        debug!(url = %url, "validating session ticket");

        let mut options = self.client.request_options();
        options.headers = vec![
            self.client.rest_authentication_header(ticket),
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];

        let result = self.client.execute(&url, options).await?;
        let data = self.client.parse_json(&result)?;

        if json_str(&data, "statusCode") != Some("OK") {
            return Err(EduError::TicketInvalid);
        }
        match data {
            Value::Object(map) => Ok(map),
            _ => Err(EduError::MalformedResponse {
                message: "session info is not a JSON object".to_string(),
            }),
        }
    }
}
