//! HTTP client for communicating with the SDN controller.
//!
//! This module provides the `SdnClient` trait consumed by the sync worker,
//! the reqwest-backed `HttpSdnClient`, and `NoopSdnClient` for deployments
//! with controller sync disabled.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;

pub use reqwest::Method;

use crate::config::SdnConfig;
use crate::error::SdnError;

/// A result type using `SdnError`.
pub type ClientResult<T> = std::result::Result<T, SdnError>;

/// A controller response that passed the status checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdnResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub text: String,
}

impl SdnResponse {
    /// Build a response from its parts.
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.text)
    }

    /// Whether the controller does not implement the request (501).
    #[must_use]
    pub const fn is_not_implemented(&self) -> bool {
        self.status == 501
    }

    /// Whether the target was not found (404).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Trait for controller communication.
///
/// This trait abstracts the controller client interface, allowing for
/// mock implementations in tests.
#[async_trait]
pub trait SdnClient: Send + Sync {
    /// Send a request to the controller.
    ///
    /// A 404 answer to `DELETE` and a 501 answer to anything are returned as
    /// responses; other 4xx and 5xx answers are errors.
    ///
    /// # Errors
    ///
    /// Returns `SdnError::Connection` on transport failure or timeout,
    /// `SdnError::Login` on 401/403, and `SdnError::Http` on other error
    /// statuses.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<SdnResponse>;

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`SdnClient::request`].
    async fn get(&self, path: &str) -> ClientResult<SdnResponse> {
        self.request(Method::GET, path, None).await
    }

    /// `PUT path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`SdnClient::request`].
    async fn put(&self, path: &str, body: Option<&serde_json::Value>) -> ClientResult<SdnResponse> {
        self.request(Method::PUT, path, body).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`SdnClient::request`].
    async fn post(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<SdnResponse> {
        self.request(Method::POST, path, body).await
    }

    /// `DELETE path` with an optional JSON body.
    ///
    /// # Errors
    ///
    /// See [`SdnClient::request`].
    async fn delete(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<SdnResponse> {
        self.request(Method::DELETE, path, body).await
    }
}

/// Join URL segments with single slashes, skipping empty segments.
#[must_use]
pub fn strings_to_url(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Apply the controller's status rules to a raw answer.
///
/// # Errors
///
/// Returns `SdnError::Login` for 401/403 and `SdnError::Http` for other
/// error statuses, except 404 on `DELETE` and 501.
pub fn check_response(method: &Method, status: u16, text: String) -> ClientResult<SdnResponse> {
    let delete_not_found = status == 404 && *method == Method::DELETE;
    if status < 400 || status == 501 || delete_not_found {
        return Ok(SdnResponse { status, text });
    }

    match status {
        401 | 403 => Err(SdnError::Login { status }),
        _ => Err(SdnError::Http { status, body: text }),
    }
}

/// HTTP client for the SDN controller.
///
/// `GET` requests go to `url/path`; mutating requests go to
/// `url/domain/path`.
#[derive(Debug, Clone)]
pub struct HttpSdnClient {
    client: reqwest::Client,
    url: String,
    domain: String,
    token: String,
}

impl HttpSdnClient {
    /// Create a new controller client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SdnError::Config` if `url` or `token` is missing,
    /// `SdnError::Cert` if `cert_verify` is set and `cert_path` cannot be
    /// read as a PEM certificate.
    pub fn new(config: &SdnConfig) -> ClientResult<Self> {
        config
            .validate()
            .map_err(|e| SdnError::Config(e.to_string()))?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout());

        if config.cert_verify {
            if !config.cert_path.is_empty() {
                let pem = std::fs::read(&config.cert_path).map_err(|e| {
                    SdnError::Cert(format!(
                        "certificate path \"{}\" was not found: {e}",
                        config.cert_path
                    ))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| SdnError::Cert(e.to_string()))?;
                builder = builder.add_root_certificate(cert);
            }
        } else {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;
        Ok(Self::with_client(
            client,
            &config.url,
            &config.domain,
            &config.token,
        ))
    }

    /// Create a controller client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: &str, domain: &str, token: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            domain: domain.to_string(),
            token: token.to_string(),
        }
    }

    /// Get the base URL of the controller.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.url
    }

    fn url_for(&self, method: &Method, path: &str) -> String {
        if *method == Method::GET {
            strings_to_url(&[&self.url, path])
        } else {
            strings_to_url(&[&self.url, &self.domain, path])
        }
    }
}

#[async_trait]
impl SdnClient for HttpSdnClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<SdnResponse> {
        let url = self.url_for(&method, path);
        tracing::debug!(method = %method, url = %url, "Sending controller request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(AUTHORIZATION, format!("Basic {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(body) = body.filter(|b| !b.is_null()) {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(method = %method, url = %url, error = %e, "Controller request failed");
            SdnError::Connection(e.to_string())
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| SdnError::Connection(e.to_string()))?;
        tracing::debug!(status, text = %text, "Controller response");

        check_response(&method, status, text).inspect_err(|e| {
            tracing::error!(method = %method, url = %url, error = %e, "Controller rejected request");
        })
    }
}

/// A no-op client for when controller sync is disabled.
///
/// Every request is answered with 501, so recorded rows complete without
/// contacting anything.
#[derive(Debug, Clone, Default)]
pub struct NoopSdnClient;

impl NoopSdnClient {
    /// Create a new no-op client.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SdnClient for NoopSdnClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        _body: Option<&serde_json::Value>,
    ) -> ClientResult<SdnResponse> {
        tracing::debug!(
            method = %method,
            path = %path,
            "NoopSdnClient: request dropped, controller sync disabled"
        );
        Ok(SdnResponse::new(501, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpSdnClient {
        let config = SdnConfig {
            url: format!("{}/neo/", server.uri()),
            ..SdnConfig::default()
        };
        HttpSdnClient::new(&config).unwrap()
    }

    #[test]
    fn url_joining() {
        assert_eq!(strings_to_url(&["http://h/neo/", "/cloudx", "port/"]), "http://h/neo/cloudx/port");
        assert_eq!(strings_to_url(&["network", "", "n1"]), "network/n1");
    }

    #[test]
    fn status_rules() {
        assert!(check_response(&Method::DELETE, 404, String::new()).is_ok());
        assert!(matches!(
            check_response(&Method::PUT, 404, String::new()),
            Err(SdnError::Http { status: 404, .. })
        ));
        assert_eq!(
            check_response(&Method::POST, 501, String::new()).unwrap().status,
            501
        );
        assert!(matches!(
            check_response(&Method::GET, 401, String::new()),
            Err(SdnError::Login { status: 401 })
        ));
        assert!(matches!(
            check_response(&Method::GET, 500, "boom".into()),
            Err(SdnError::Http { status: 500, .. })
        ));
        assert!(check_response(&Method::GET, 202, String::new()).is_ok());
    }

    #[test]
    fn missing_url_is_config_error() {
        let result = HttpSdnClient::new(&SdnConfig::default());
        assert!(matches!(result, Err(SdnError::Config(_))));
    }

    #[test]
    fn missing_certificate_is_cert_error() {
        let config = SdnConfig {
            url: "https://neo".to_string(),
            cert_verify: true,
            cert_path: "/nonexistent/ca.pem".to_string(),
            ..SdnConfig::default()
        };
        assert!(matches!(HttpSdnClient::new(&config), Err(SdnError::Cert(_))));
    }

    #[tokio::test]
    async fn mutating_requests_use_domain() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/neo/cloudx/network/n1"))
            .and(header("Authorization", "Basic abcdef"))
            .and(body_json(json!({"name": "net"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "/jobs/1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client
            .put("network/n1", Some(&json!({"name": "net"})))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["job_id"], "/jobs/1");
    }

    #[tokio::test]
    async fn get_skips_domain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/neo/jobs/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": "Running"})))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).get("jobs/42").await.unwrap();
        assert!(response.text.contains("Running"));
    }

    #[tokio::test]
    async fn delete_not_found_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = client_for(&server).delete("port/p1", None).await.unwrap();
        assert!(response.is_not_found());
    }

    #[tokio::test]
    async fn unauthorized_is_login_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client_for(&server).post("port", Some(&json!({}))).await;
        assert!(matches!(result, Err(SdnError::Login { status: 401 })));
    }

    #[tokio::test]
    async fn timeout_is_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let client = HttpSdnClient::with_client(http, &server.uri(), "cloudx", "abcdef");
        let result = client.get("jobs/1").await;
        assert!(matches!(result, Err(SdnError::Connection(_))));
    }

    #[tokio::test]
    async fn noop_client_answers_not_implemented() {
        let response = NoopSdnClient::new().post("port", None).await.unwrap();
        assert!(response.is_not_implemented());
    }
}
