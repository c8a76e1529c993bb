//! Usage lifecycle: create, resolve, fetch (with URL rewriting) and delete.
//!
//! A usage binds a repository node to a (container, resource) slot in the
//! caller's system and grants access to the node independent of the user who
//! originally authorized it, similar to a license. The remote-side lifecycle
//! observed through these calls is `create -> active -> deleted`; a read may
//! itself reveal that the repository already moved the usage or the node to a
//! terminal state.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::client::{json_str, EduClient};
use crate::error::{EduError, EduResult};
use crate::transport::{Method, RequestResult};
use crate::types::{DisplayMode, RedirectMode, Usage};

/// Placeholder the repository embeds in `detailsSnippet` for the caller's
/// inline helper script.
const INLINE_HELPER_PLACEHOLDER: &str = "{{{LMS_INLINE_HELPER_SCRIPT}}}";

/// Usage operations, built on a shared [`EduClient`].
#[derive(Debug, Clone)]
pub struct UsageClient {
    client: Arc<EduClient>,
}

impl UsageClient {
    pub fn new(client: Arc<EduClient>) -> Self {
        Self { client }
    }

    /// Create a usage for a node.
    ///
    /// The user behind `ticket` must hold publish permission on the node;
    /// this is enforced by the repository. The returned [`Usage`] carries the
    /// repository's canonical parent node id, which may differ from the
    /// `node_id` passed in. Persist all of it in your own system.
    pub async fn create_usage(
        &self,
        ticket: &str,
        container_id: &str,
        resource_id: &str,
        node_id: &str,
        node_version: Option<&str>,
    ) -> EduResult<Usage> {
        let url = format!(
            "{}/rest/usage/v1/usages/repository/-home-",
            self.client.base_url()
        );
        debug!(url = %url, node_id, "creating usage");

        let mut options = self.client.request_options();
        options.method = Method::Post;
        options.headers = self.client.signature_headers(ticket)?;
        options.headers.push(self.client.rest_authentication_header(ticket));
        options.body = Some(
            json!({
                "appId": self.client.app_id(),
                "courseId": container_id,
                "resourceId": resource_id,
                "nodeId": node_id,
                "nodeVersion": node_version,
            })
            .to_string(),
        );

        let result = self.client.execute(&url, options).await?;
        let data = self.client.parse_json(&result)?;

        if result.is_status(200) && data.get("error").is_none() {
            let parent_node_id =
                json_str(&data, "parentNodeId").ok_or_else(|| EduError::MalformedResponse {
                    message: "usage response did not contain a parentNodeId".to_string(),
                })?;
            let usage_id =
                json_str(&data, "nodeId").ok_or_else(|| EduError::MalformedResponse {
                    message: "usage response did not contain a usage node id".to_string(),
                })?;
            return Ok(Usage {
                node_id: parent_node_id.to_string(),
                node_version: node_version.map(str::to_string),
                container_id: container_id.to_string(),
                resource_id: resource_id.to_string(),
                usage_id: usage_id.to_string(),
            });
        }
        Err(EduClient::remote_failure("creating usage", &result, &data))
    }

    /// Look up the usage id for a (node, container, resource) triple.
    ///
    /// Only relevant for legacy callers that did not persist the usage id and
    /// need it to delete the usage. Returns `None` when no usage of this app
    /// matches exactly, or when the matching entry carries no id.
    #[deprecated(note = "persist the usage id returned by create_usage instead")]
    pub async fn get_usage_id_by_parameters(
        &self,
        ticket: &str,
        node_id: &str,
        container_id: &str,
        resource_id: &str,
    ) -> EduResult<Option<String>> {
        let url = format!(
            "{}/rest/usage/v1/usages/node/{}",
            self.client.base_url(),
            urlencoding::encode(node_id)
        );
        debug!(url = %url, "listing usages for node");

        let mut options = self.client.request_options();
        options.headers = self.client.signature_headers(ticket)?;
        options.headers.push(self.client.rest_authentication_header(ticket));

        let result = self.client.execute(&url, options).await?;
        let data = self.client.parse_json(&result)?;

        if result.is_status(200) {
            if let Some(usages) = data.get("usages").and_then(Value::as_array) {
                for usage in usages {
                    if json_str(usage, "appId") == Some(self.client.app_id())
                        && json_str(usage, "courseId") == Some(container_id)
                        && json_str(usage, "resourceId") == Some(resource_id)
                    {
                        return Ok(json_str(usage, "nodeId").map(str::to_string));
                    }
                }
                return Ok(None);
            }
        }
        Err(EduClient::remote_failure("fetching usage list", &result, &data))
    }

    /// Load the node referred to by a usage.
    ///
    /// `display_mode` only changes the markup in the returned `detailsSnippet`;
    /// `user_id` is passed along for tracking purposes only. With URL handling
    /// enabled, content and download URLs in the response are rewritten to the
    /// configured redirect endpoint.
    pub async fn get_node_by_usage(
        &self,
        usage: &Usage,
        display_mode: DisplayMode,
        rendering_params: Option<&Value>,
        user_id: Option<&str>,
    ) -> EduResult<Value> {
        let mut url = format!(
            "{}/rest/rendering/v1/details/-home-/{}?displayMode={}",
            self.client.base_url(),
            urlencoding::encode(&usage.node_id),
            display_mode.as_str()
        );
        if let Some(version) = &usage.node_version {
            url.push_str(&format!("&version={}", urlencoding::encode(version)));
        }
        debug!(url = %url, usage_id = %usage.usage_id, "fetching node by usage");

        let mut options = self.client.request_options();
        options.method = Method::Post;
        options.headers = self.usage_signature_headers(usage, user_id)?;
        if let Some(params) = rendering_params {
            options.body = Some(params.to_string());
        }

        let result = self.client.execute(&url, options).await?;
        let mut data = self.client.parse_json(&result)?;

        if result.is_status(200) {
            self.handle_url_mapping(&mut data, usage);
            return Ok(data);
        }
        match result.status {
            403 => Err(EduError::UsageDeleted {
                message: "the given usage is deleted and the requested node is not public"
                    .to_string(),
            }),
            404 => Err(EduError::NodeDeleted {
                message: format!(
                    "the given node is already deleted {}: {} {}",
                    result.status,
                    json_str(&data, "error").unwrap_or("unknown"),
                    json_str(&data, "message").unwrap_or("unknown"),
                ),
            }),
            _ => Err(EduClient::remote_failure(
                "fetching node by usage",
                &result,
                &data,
            )),
        }
    }

    /// Build an authenticated redirect URL for a usage's content or download.
    ///
    /// Fetches the node with [`DisplayMode::Prerender`] so the repository can
    /// track redirect-triggered views separately, then appends the signature
    /// headers as query parameters: the redirect target is itself a signed,
    /// self-contained URL.
    pub async fn get_redirect_url(
        &self,
        mode: RedirectMode,
        usage: &Usage,
        user_id: Option<&str>,
    ) -> EduResult<String> {
        let headers = self.usage_signature_headers(usage, None)?;
        let node = self
            .get_node_by_usage(usage, DisplayMode::Prerender, None, user_id)
            .await?;

        let mut params = String::new();
        for (name, value) in &headers {
            if !name.starts_with("X-") {
                continue;
            }
            params.push_str(&format!("&{name}={}", urlencoding::encode(value)));
        }

        let url = match mode {
            RedirectMode::Content => {
                params.push_str("&closeOnBack=true");
                node["node"]["content"]["url"].as_str().unwrap_or_default()
            }
            RedirectMode::Download => node["node"]["downloadUrl"].as_str().unwrap_or_default(),
        };

        if url.contains('?') {
            Ok(format!("{url}{params}"))
        } else {
            Ok(format!("{url}?{}", &params[1..]))
        }
    }

    /// Delete a usage.
    ///
    /// No ticket is required: the endpoint only acts on usages created by this
    /// app id, proven by the request signature over `node_id + usage_id`.
    /// Whether the current user in your context may delete it is your call.
    pub async fn delete_usage(&self, node_id: &str, usage_id: &str) -> EduResult<()> {
        let url = format!(
            "{}/rest/usage/v1/usages/node/{}/{}",
            self.client.base_url(),
            urlencoding::encode(node_id),
            urlencoding::encode(usage_id)
        );
        debug!(url = %url, "deleting usage");

        let mut options = self.client.request_options();
        options.method = Method::Delete;
        options.headers = self
            .client
            .signature_headers(&format!("{node_id}{usage_id}"))?;

        let result = self.client.execute(&url, options).await?;

        if result.is_status(200) {
            return Ok(());
        }
        if result.transport_error == 0 && result.status == 404 {
            return Err(EduError::UsageDeleted {
                message: "the given usage is already deleted or does not exist".to_string(),
            });
        }
        let data = serde_json::from_str(&result.content).unwrap_or(Value::Null);
        Err(EduClient::remote_failure("deleting usage", &result, &data))
    }

    /// Fetch a preview thumbnail for a usage.
    ///
    /// Deliberately permissive: the raw transport result is returned without
    /// status interpretation, previews are best effort.
    pub async fn get_preview(&self, usage: &Usage) -> EduResult<RequestResult> {
        let mut url = format!(
            "{}/preview?nodeId={}&maxWidth=400&maxHeight=400&crop=true",
            self.client.base_url(),
            urlencoding::encode(&usage.node_id)
        );
        if let Some(version) = &usage.node_version {
            url.push_str(&format!("&version={}", urlencoding::encode(version)));
        }
        debug!(url = %url, "fetching preview");

        let mut options = self.client.request_options();
        options.headers = self.usage_signature_headers(usage, None)?;
        self.client.execute(&url, options).await
    }

    /// Signature headers scoped to the usage id, plus the non-signature
    /// headers identifying node, container and resource.
    fn usage_signature_headers(
        &self,
        usage: &Usage,
        user_id: Option<&str>,
    ) -> EduResult<Vec<(String, String)>> {
        let mut headers = self.client.signature_headers(&usage.usage_id)?;
        headers.push(("X-Edu-Usage-Node-Id".to_string(), usage.node_id.clone()));
        headers.push((
            "X-Edu-Usage-Course-Id".to_string(),
            usage.container_id.clone(),
        ));
        headers.push((
            "X-Edu-Usage-Resource-Id".to_string(),
            usage.resource_id.clone(),
        ));
        if let Some(user_id) = user_id {
            headers.push(("X-Edu-User-Id".to_string(), user_id.to_string()));
        }
        Ok(headers)
    }

    /// Rewrite content/download URLs onto the configured redirect endpoint and
    /// substitute the inline helper placeholder in `detailsSnippet`.
    fn handle_url_mapping(&self, data: &mut Value, usage: &Usage) {
        let url_handling = &self.client.config().url_handling;
        if !url_handling.enabled || data.get("node").is_none() {
            return;
        }

        let mut params = format!(
            "&usageId={}&nodeId={}&resourceId={}&containerId={}",
            urlencoding::encode(&usage.usage_id),
            urlencoding::encode(&usage.node_id),
            urlencoding::encode(&usage.resource_id),
            urlencoding::encode(&usage.container_id),
        );
        if let Some(version) = &usage.node_version {
            params.push_str(&format!("&nodeVersion={}", urlencoding::encode(version)));
        }

        let endpoint = &url_handling.endpoint_url;
        let endpoint_base = format!(
            "{endpoint}{}",
            if endpoint.contains('?') { '&' } else { '?' }
        );
        let content_url = format!("{endpoint_base}mode=content{params}");
        data["url"] = json!({
            "content": content_url,
            "download": format!("{endpoint_base}mode=download{params}"),
        });
        if let Some(snippet) = data["detailsSnippet"].as_str() {
            data["detailsSnippet"] =
                Value::String(snippet.replace(INLINE_HELPER_PLACEHOLDER, &content_url));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::test_key_pair;
    use crate::transport::StaticTransport;
    use crate::types::EduConfig;

    fn test_config() -> EduConfig {
        EduConfig::new(
            "http://repo.example/edu-sharing",
            "myapp",
            test_key_pair().private_key.clone(),
        )
    }

    fn usage_client(config: EduConfig, transport: Arc<StaticTransport>) -> UsageClient {
        UsageClient::new(Arc::new(
            EduClient::with_transport(config, transport).unwrap(),
        ))
    }

    fn sample_usage() -> Usage {
        Usage {
            node_id: "node-1".into(),
            node_version: None,
            container_id: "course-7".into(),
            resource_id: "slot-3".into(),
            usage_id: "usage-9".into(),
        }
    }

    #[tokio::test]
    async fn create_usage_uses_remote_parent_node_id() {
        let transport = Arc::new(StaticTransport::replying(
            r#"{"parentNodeId":"canonical-node","nodeId":"usage-42"}"#,
            0,
            200,
        ));
        let client = usage_client(test_config(), transport.clone());

        let usage = client
            .create_usage("T", "course-7", "slot-3", "node-1", Some("1.1"))
            .await
            .unwrap();

        assert_eq!(usage.node_id, "canonical-node");
        assert_eq!(usage.usage_id, "usage-42");
        assert_eq!(usage.node_version.as_deref(), Some("1.1"));
        assert_eq!(usage.container_id, "course-7");
        assert_eq!(usage.resource_id, "slot-3");

        let requests = transport.requests.lock().unwrap();
        let (url, options) = &requests[0];
        assert!(url.ends_with("/rest/usage/v1/usages/repository/-home-"));
        assert_eq!(options.method, Method::Post);
        let body: Value = serde_json::from_str(options.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["appId"], "myapp");
        assert_eq!(body["courseId"], "course-7");
        assert_eq!(body["nodeVersion"], "1.1");
        assert!(options
            .headers
            .iter()
            .any(|(n, v)| n == "Authorization" && v == "EDU-TICKET T"));
    }

    #[tokio::test]
    async fn create_usage_failure_is_a_remote_error() {
        let transport = Arc::new(StaticTransport::replying(
            r#"{"error":"DAOException","message":"no publish permission"}"#,
            0,
            403,
        ));
        let client = usage_client(test_config(), transport);
        let err = client
            .create_usage("T", "course-7", "slot-3", "node-1", None)
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("creating usage failed"));
        assert!(text.contains("403"));
        assert!(text.contains("no publish permission"));
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn usage_id_lookup_matches_exact_triple() {
        let body = r#"{"usages":[
            {"appId":"otherapp","courseId":"course-7","resourceId":"slot-3","nodeId":"u-1"},
            {"appId":"myapp","courseId":"course-7","resourceId":"slot-3","nodeId":"u-2"},
            {"appId":"myapp","courseId":"course-8","resourceId":"slot-3","nodeId":"u-3"}
        ]}"#;
        let transport = Arc::new(StaticTransport::replying(body, 0, 200));
        let client = usage_client(test_config(), transport);

        let found = client
            .get_usage_id_by_parameters("T", "node-1", "course-7", "slot-3")
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("u-2"));
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn usage_id_lookup_returns_none_when_unmatched_or_id_missing() {
        let no_match = r#"{"usages":[{"appId":"otherapp","courseId":"c","resourceId":"r"}]}"#;
        let transport = Arc::new(StaticTransport::replying(no_match, 0, 200));
        let client = usage_client(test_config(), transport);
        assert!(client
            .get_usage_id_by_parameters("T", "node-1", "course-7", "slot-3")
            .await
            .unwrap()
            .is_none());

        let id_missing =
            r#"{"usages":[{"appId":"myapp","courseId":"course-7","resourceId":"slot-3"}]}"#;
        let transport = Arc::new(StaticTransport::replying(id_missing, 0, 200));
        let client = usage_client(test_config(), transport);
        assert!(client
            .get_usage_id_by_parameters("T", "node-1", "course-7", "slot-3")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn usage_id_lookup_failure_is_a_remote_error() {
        let transport = Arc::new(StaticTransport::replying(
            r#"{"error":"boom","message":"nope"}"#,
            0,
            500,
        ));
        let client = usage_client(test_config(), transport);
        let err = client
            .get_usage_id_by_parameters("T", "node-1", "course-7", "slot-3")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fetching usage list failed"));
    }

    #[tokio::test]
    async fn node_by_usage_maps_status_codes() {
        let cases: [(u16, fn(&EduError) -> bool); 3] = [
            (403, |e| matches!(e, EduError::UsageDeleted { .. })),
            (404, |e| matches!(e, EduError::NodeDeleted { .. })),
            (418, |e| {
                matches!(e, EduError::Remote { .. })
                    && e.to_string().contains("fetching node by usage failed")
            }),
        ];
        for (status, check) in cases {
            let transport = Arc::new(StaticTransport::replying(
                r#"{"error":"err","message":"msg"}"#,
                0,
                status,
            ));
            let client = usage_client(test_config(), transport);
            let err = client
                .get_node_by_usage(&sample_usage(), DisplayMode::Inline, None, None)
                .await
                .unwrap_err();
            assert!(check(&err), "status {status} mapped to {err:?}");
        }
    }

    #[tokio::test]
    async fn node_by_usage_success_returns_decoded_body() {
        let transport = Arc::new(StaticTransport::replying(
            r#"{"node":{"name":"n"},"detailsSnippet":"<div/>"}"#,
            0,
            200,
        ));
        let client = usage_client(test_config(), transport.clone());
        let data = client
            .get_node_by_usage(&sample_usage(), DisplayMode::Embed, None, Some("alice"))
            .await
            .unwrap();
        assert_eq!(data["node"]["name"], "n");

        let requests = transport.requests.lock().unwrap();
        let (url, options) = &requests[0];
        assert!(url.contains("/rest/rendering/v1/details/-home-/node-1"));
        assert!(url.contains("displayMode=embed"));
        let header = |name: &str| {
            options
                .headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(header("X-Edu-Usage-Node-Id"), Some("node-1"));
        assert_eq!(header("X-Edu-Usage-Course-Id"), Some("course-7"));
        assert_eq!(header("X-Edu-Usage-Resource-Id"), Some("slot-3"));
        assert_eq!(header("X-Edu-User-Id"), Some("alice"));
    }

    #[tokio::test]
    async fn node_version_pins_the_rendering_request() {
        let transport = Arc::new(StaticTransport::replying(r#"{"node":{}}"#, 0, 200));
        let client = usage_client(test_config(), transport.clone());
        let mut usage = sample_usage();
        usage.node_version = Some("1.2".into());
        client
            .get_node_by_usage(&usage, DisplayMode::Inline, None, None)
            .await
            .unwrap();
        let requests = transport.requests.lock().unwrap();
        assert!(requests[0].0.contains("&version=1.2"));
    }

    #[tokio::test]
    async fn url_rewriting_substitutes_placeholder_and_sets_urls() {
        let body = r#"{"node":{"name":"n"},"detailsSnippet":"<script src='{{{LMS_INLINE_HELPER_SCRIPT}}}'></script>"}"#;
        let transport = Arc::new(StaticTransport::replying(body, 0, 200));
        let config = test_config().with_url_handling("https://lms.example/edu-redirect");
        let client = usage_client(config, transport);

        let data = client
            .get_node_by_usage(&sample_usage(), DisplayMode::Inline, None, None)
            .await
            .unwrap();

        let content = data["url"]["content"].as_str().unwrap();
        let download = data["url"]["download"].as_str().unwrap();
        assert!(content.starts_with("https://lms.example/edu-redirect?mode=content"));
        assert!(content.contains("&usageId=usage-9"));
        assert!(content.contains("&nodeId=node-1"));
        assert!(content.contains("&resourceId=slot-3"));
        assert!(content.contains("&containerId=course-7"));
        assert!(download.starts_with("https://lms.example/edu-redirect?mode=download"));

        let snippet = data["detailsSnippet"].as_str().unwrap();
        assert!(!snippet.contains(INLINE_HELPER_PLACEHOLDER));
        assert!(snippet.contains(content));
    }

    #[tokio::test]
    async fn url_rewriting_is_skipped_when_disabled() {
        let body = r#"{"node":{"name":"n"},"detailsSnippet":"{{{LMS_INLINE_HELPER_SCRIPT}}}"}"#;
        let transport = Arc::new(StaticTransport::replying(body, 0, 200));
        let client = usage_client(test_config(), transport);

        let data = client
            .get_node_by_usage(&sample_usage(), DisplayMode::Inline, None, None)
            .await
            .unwrap();
        assert!(data.get("url").is_none());
        assert_eq!(data["detailsSnippet"], INLINE_HELPER_PLACEHOLDER);
    }

    #[tokio::test]
    async fn redirect_url_carries_signature_params() {
        let body = r#"{"node":{"content":{"url":"http://repo.example/content/node-1"},"downloadUrl":"http://repo.example/download/node-1"}}"#;
        let transport = Arc::new(StaticTransport::replying(body, 0, 200));
        let client = usage_client(test_config(), transport);

        let url = client
            .get_redirect_url(RedirectMode::Content, &sample_usage(), None)
            .await
            .unwrap();
        assert!(url.starts_with("http://repo.example/content/node-1?"));
        assert!(url.contains("X-Edu-App-Id=myapp"));
        assert!(url.contains("X-Edu-App-Sig="));
        assert!(url.contains("X-Edu-App-Signed="));
        assert!(url.contains("X-Edu-Usage-Node-Id=node-1"));
        assert!(url.ends_with("&closeOnBack=true"));
        // Content negotiation headers must not leak into the URL.
        assert!(!url.contains("Accept="));
        assert!(!url.contains("Content-Type="));
    }

    #[tokio::test]
    async fn redirect_url_download_mode_uses_download_url() {
        let body = r#"{"node":{"content":{"url":"http://repo.example/content/node-1"},"downloadUrl":"http://repo.example/download/node-1?x=1"}}"#;
        let transport = Arc::new(StaticTransport::replying(body, 0, 200));
        let client = usage_client(test_config(), transport);

        let url = client
            .get_redirect_url(RedirectMode::Download, &sample_usage(), None)
            .await
            .unwrap();
        assert!(url.starts_with("http://repo.example/download/node-1?x=1&X-Edu-App-Id=myapp"));
        assert!(!url.contains("closeOnBack"));
    }

    #[tokio::test]
    async fn delete_usage_maps_status_codes() {
        let transport = Arc::new(StaticTransport::replying("", 0, 200));
        let client = usage_client(test_config(), transport.clone());
        client.delete_usage("node-1", "usage-9").await.unwrap();

        let requests = transport.requests.lock().unwrap();
        let (url, options) = &requests[0];
        assert!(url.ends_with("/rest/usage/v1/usages/node/node-1/usage-9"));
        assert_eq!(options.method, Method::Delete);
        let signed = options
            .headers
            .iter()
            .find(|(n, _)| n == "X-Edu-App-Signed")
            .map(|(_, v)| v.as_str())
            .unwrap();
        assert!(signed.starts_with("myappnode-1usage-9"));
        drop(requests);

        let transport = Arc::new(StaticTransport::replying("", 0, 404));
        let client = usage_client(test_config(), transport);
        let err = client.delete_usage("node-1", "usage-9").await.unwrap_err();
        assert!(matches!(err, EduError::UsageDeleted { .. }));

        let transport = Arc::new(StaticTransport::replying("denied", 0, 500));
        let client = usage_client(test_config(), transport);
        let err = client.delete_usage("node-1", "usage-9").await.unwrap_err();
        assert!(err.to_string().contains("deleting usage failed"));
    }

    #[tokio::test]
    async fn preview_returns_raw_result_without_interpretation() {
        let transport = Arc::new(StaticTransport::replying("not-an-image", 0, 500));
        let client = usage_client(test_config(), transport.clone());

        let result = client.get_preview(&sample_usage()).await.unwrap();
        assert_eq!(result.status, 500);
        assert_eq!(result.content, "not-an-image");

        let requests = transport.requests.lock().unwrap();
        assert!(requests[0]
            .0
            .contains("/preview?nodeId=node-1&maxWidth=400&maxHeight=400&crop=true"));
    }
}
