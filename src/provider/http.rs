//! HTTP control-plane adapter.
//!
//! Resources live under `{endpoint}/v1/{kind}`:
//! `POST` creates, `PUT`/`DELETE`/`GET` on `/{remote_id}` update, delete and
//! read. Requests carry a bearer token.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{Properties, ResourceKind};
use crate::error::{ProviderError, ProviderResult};

use super::ResourceProvider;
use super::types::{ProvisionedResource, RemoteResource};

/// Request body for create and update calls.
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    properties: &'a Properties,
}

/// HTTP control-plane adapter.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    endpoint: String,
    /// Bearer token.
    token: Option<String>,
}

impl HttpProvider {
    /// Creates a new adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>, timeout_secs: u64) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, kind: ResourceKind, remote_id: Option<&str>) -> String {
        match remote_id {
            Some(id) => format!("{}/v1/{}/{id}", self.endpoint, kind.api_path()),
            None => format!("{}/v1/{}", self.endpoint, kind.api_path()),
        }
    }

    /// Sends a request and maps non-success statuses to provider errors.
    async fn send(&self, request: RequestBuilder, remote_id: Option<&str>) -> ProviderResult<Response> {
        let request = match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        trace!("Provider responded with {status}");

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        Err(map_status(status, retry_after, body, remote_id))
    }

    async fn parse<T: for<'de> serde::Deserialize<'de>>(response: Response) -> ProviderResult<T> {
        response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            message: e.to_string(),
        }
    } else {
        ProviderError::network(format!("Request failed: {e}"))
    }
}

/// Maps an HTTP status to the transient/permanent taxonomy.
fn map_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
    remote_id: Option<&str>,
) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited { retry_after_secs },
        408 | 504 => ProviderError::Timeout { message: body },
        500 | 502 | 503 => ProviderError::Unavailable {
            status: status.as_u16(),
            message: body,
        },
        401 | 403 => ProviderError::PermissionDenied { message: body },
        400 | 422 => ProviderError::InvalidProperty { message: body },
        404 => ProviderError::NotFound {
            remote_id: remote_id.unwrap_or_default().to_string(),
        },
        409 => ProviderError::Conflict { message: body },
        other => ProviderError::api_error(other, body),
    }
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    async fn create(
        &self,
        kind: ResourceKind,
        properties: &Properties,
    ) -> ProviderResult<ProvisionedResource> {
        debug!("POST {}", self.url(kind, None));
        let request = self
            .client
            .post(self.url(kind, None))
            .json(&ResourceRequest { properties });
        Self::parse(self.send(request, None).await?).await
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        properties: &Properties,
    ) -> ProviderResult<ProvisionedResource> {
        debug!("PUT {}", self.url(kind, Some(remote_id)));
        let request = self
            .client
            .put(self.url(kind, Some(remote_id)))
            .json(&ResourceRequest { properties });
        Self::parse(self.send(request, Some(remote_id)).await?).await
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<()> {
        debug!("DELETE {}", self.url(kind, Some(remote_id)));
        let request = self.client.delete(self.url(kind, Some(remote_id)));
        self.send(request, Some(remote_id)).await?;
        Ok(())
    }

    async fn get(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<RemoteResource> {
        let request = self.client.get(self.url(kind, Some(remote_id)));
        Self::parse(self.send(request, Some(remote_id)).await?).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RemoteStatus;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some(String::from("secret")), 5).unwrap()
    }

    fn props() -> Properties {
        let mut props = Properties::new();
        props.insert("block_public_access".into(), json!(true));
        props
    }

    #[tokio::test]
    async fn test_create_posts_properties() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/buckets"))
            .and(header_eq("authorization", "Bearer secret"))
            .and(body_json(json!({"properties": {"block_public_access": true}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "bkt-123",
                "status": "ready",
                "outputs": {"arn": "arn:bucket:bkt-123"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = provider(&server)
            .create(ResourceKind::Bucket, &props())
            .await
            .unwrap();

        assert_eq!(created.remote_id, "bkt-123");
        assert_eq!(created.status, RemoteStatus::Ready);
        assert_eq!(created.outputs["arn"], json!("arn:bucket:bkt-123"));
    }

    #[tokio::test]
    async fn test_get_in_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/distributions/dist-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dist-1",
                "status": "in_progress"
            })))
            .mount(&server)
            .await;

        let remote = provider(&server)
            .get(ResourceKind::Distribution, "dist-1")
            .await
            .unwrap();
        assert_eq!(remote.status, RemoteStatus::InProgress);
        assert!(remote.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/dns-records/rec-1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .update(ResourceKind::DnsRecord, "rec-1", &props())
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::RateLimited { retry_after_secs: Some(7) });
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/policies/pol-9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider(&server)
            .delete(ResourceKind::Policy, "pol-9")
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::NotFound { remote_id: "pol-9".into() });
    }

    #[tokio::test]
    async fn test_unavailable_is_transient_and_denied_is_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/certificates"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/distributions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("no"))
            .mount(&server)
            .await;

        let p = provider(&server);
        let unavailable = p.create(ResourceKind::Certificate, &props()).await.unwrap_err();
        assert!(unavailable.is_transient());

        let denied = p.create(ResourceKind::Distribution, &props()).await.unwrap_err();
        assert_eq!(denied, ProviderError::PermissionDenied { message: "no".into() });
        assert!(!denied.is_transient());
    }

    #[test]
    fn test_status_mapping() {
        let map = |code: u16| map_status(StatusCode::from_u16(code).unwrap(), None, String::new(), Some("x"));
        assert!(matches!(map(408), ProviderError::Timeout { .. }));
        assert!(matches!(map(504), ProviderError::Timeout { .. }));
        assert!(matches!(map(502), ProviderError::Unavailable { status: 502, .. }));
        assert!(matches!(map(422), ProviderError::InvalidProperty { .. }));
        assert!(matches!(map(409), ProviderError::Conflict { .. }));
        assert!(matches!(map(418), ProviderError::ApiRequestFailed { status: 418, .. }));
    }

    #[test]
    fn test_url_building() {
        let p = HttpProvider::new("https://control.example.net/", None, 5).unwrap();
        assert_eq!(
            p.url(ResourceKind::OriginAccessIdentity, None),
            "https://control.example.net/v1/origin-access-identities"
        );
        assert_eq!(
            p.url(ResourceKind::Bucket, Some("b-1")),
            "https://control.example.net/v1/buckets/b-1"
        );
    }
}
