//! HTTP implementation of [`TestService`].
//!
//! Every successful JSON response is wrapped one level deep as
//! `{ "data": ... }`. A body without that envelope, or whose `data` has the
//! wrong shape, is reported as [`ServiceError::Parse`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::TestService;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::types::{
    HealthStatus, Report, ReportSummary, Statistics, StatusReport, TestCode, TestHistory,
    TestResults,
};

pub struct HttpTestService {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedTest {
    test_code: String,
}

impl HttpTestService {
    /// Create a client from configuration.
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(config.request_timeout());
        }
        let client = builder.build().map_err(|e| ServiceError::Transport {
            message: format!("Failed to create HTTP client: {}", e),
        })?;
        Ok(Self::with_client(client, &config.base_url))
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(method = %method, url = %url, "Sending test service request");
        self.client
            .request(method, url)
            .header("Content-Type", "application/json")
    }

    /// Send the request and return the body of a 2xx response.
    async fn send(&self, builder: RequestBuilder, resource: &str) -> Result<Bytes, ServiceError> {
        let response = builder.send().await.map_err(|e| ServiceError::Transport {
            message: format!("Request failed: {}", e),
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| ServiceError::Transport {
            message: format!("Failed to read response body: {}", e),
        })?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            warn!(status = %status, resource, "Test service returned an error");
            return Err(map_http_error(status, &text, resource));
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        resource: &str,
    ) -> Result<T, ServiceError> {
        let body = self.send(builder, resource).await?;
        parse_envelope(&body)
    }

    /// Send a request whose successful response carries no payload we use.
    async fn acknowledge(&self, builder: RequestBuilder, resource: &str) -> Result<(), ServiceError> {
        let body = self.send(builder, resource).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        serde_json::from_slice::<Value>(&body)
            .map(|_| ())
            .map_err(|e| ServiceError::parse(format!("Invalid JSON acknowledgement: {}", e)))
    }
}

/// Percent-encode one URL path segment.
fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Map a non-2xx status to the matching [`ServiceError`].
pub(crate) fn map_http_error(status: StatusCode, body: &str, resource: &str) -> ServiceError {
    match status {
        StatusCode::NOT_FOUND => {
            debug!(body = %body, "Resource not found (404)");
            ServiceError::NotFound {
                resource: resource.to_string(),
            }
        }
        _ => ServiceError::Status {
            status: status.as_u16(),
            body: extract_error_message(body),
        },
    }
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Unwrap the `{ "data": ... }` envelope and deserialize its contents.
pub(crate) fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ServiceError::parse(format!("Invalid JSON: {}", e)))?;
    let data = value
        .get("data")
        .ok_or_else(|| ServiceError::parse("response is missing the `data` envelope"))?;
    T::deserialize(data).map_err(|e| ServiceError::parse(format!("Unexpected `data` shape: {}", e)))
}

/// Read a `/health` body. An empty body counts as healthy; anything else
/// must be JSON, bare or wrapped in the `data` envelope.
fn parse_health(body: &[u8]) -> Result<HealthStatus, ServiceError> {
    let value: Value = if body.trim_ascii().is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ServiceError::parse(format!("Invalid health response: {}", e)))?
    };
    let inner = value.get("data").unwrap_or(&value);
    let status = inner
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("ok")
        .to_string();
    Ok(HealthStatus {
        status,
        details: inner.clone(),
    })
}

#[async_trait]
impl TestService for HttpTestService {
    async fn check_health(&self) -> Result<HealthStatus, ServiceError> {
        let body = self.send(self.request(Method::GET, "/health"), "health").await?;
        parse_health(&body)
    }

    async fn create_test(&self, user_email: &str) -> Result<TestCode, ServiceError> {
        let builder = self
            .request(Method::POST, "/api/tests")
            .json(&json!({ "userEmail": user_email }));
        let created: CreatedTest = self.fetch(builder, "tests").await?;
        TestCode::parse(&created.test_code)
            .map_err(|e| ServiceError::parse(format!("Service returned an unusable test code: {}", e)))
    }

    async fn start_detection(&self, code: &TestCode) -> Result<(), ServiceError> {
        let path = format!("/api/tests/{}/detect", segment(code.as_str()));
        self.acknowledge(self.request(Method::POST, &path), &format!("test {}", code))
            .await
    }

    async fn get_status(&self, code: &TestCode) -> Result<StatusReport, ServiceError> {
        let path = format!("/api/tests/{}/status", segment(code.as_str()));
        self.fetch(self.request(Method::GET, &path), &format!("test {}", code))
            .await
    }

    async fn get_results(&self, code: &TestCode) -> Result<TestResults, ServiceError> {
        let path = format!("/api/tests/{}", segment(code.as_str()));
        self.fetch(self.request(Method::GET, &path), &format!("test {}", code))
            .await
    }

    async fn get_report(&self, code: &TestCode) -> Result<Report, ServiceError> {
        let path = format!("/api/reports/{}", segment(code.as_str()));
        self.fetch(self.request(Method::GET, &path), &format!("report {}", code))
            .await
    }

    async fn get_report_summary(&self, code: &TestCode) -> Result<ReportSummary, ServiceError> {
        let path = format!("/api/reports/{}/summary", segment(code.as_str()));
        self.fetch(self.request(Method::GET, &path), &format!("report {}", code))
            .await
    }

    async fn get_report_pdf(&self, code: &TestCode) -> Result<Bytes, ServiceError> {
        let path = format!("/api/reports/{}?format=pdf", segment(code.as_str()));
        let builder = self
            .request(Method::GET, &path)
            .header("Accept", "application/pdf");
        let body = self.send(builder, &format!("report {}", code)).await?;
        if body.is_empty() {
            return Err(ServiceError::parse("PDF report is empty"));
        }
        Ok(body)
    }

    async fn send_report_email(&self, code: &TestCode, email: &str) -> Result<(), ServiceError> {
        let path = format!("/api/reports/{}/send", segment(code.as_str()));
        let builder = self
            .request(Method::POST, &path)
            .json(&json!({ "email": email }));
        self.acknowledge(builder, &format!("report {}", code)).await
    }

    async fn get_history(&self, user_email: &str) -> Result<TestHistory, ServiceError> {
        let path = format!("/api/tests/history/{}", segment(user_email));
        self.fetch(self.request(Method::GET, &path), &format!("history for {}", user_email))
            .await
    }

    async fn get_statistics(&self, user_email: &str) -> Result<Statistics, ServiceError> {
        let path = format!("/api/tests/statistics/{}", segment(user_email));
        self.fetch(
            self.request(Method::GET, &path),
            &format!("statistics for {}", user_email),
        )
        .await
    }
}
