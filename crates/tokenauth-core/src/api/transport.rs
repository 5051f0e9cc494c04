//! HTTP transport seam.
//!
//! The coordinator builds `ApiRequest`s and reads `ApiResponse`s; how the
//! bytes move is up to a `Transport`. Production uses `ReqwestTransport`.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::error::TransportError;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = body.to_string();
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Parse the body as JSON; an empty or non-JSON body is `Null`.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Sends one request and returns the response, whatever its status.
/// Only failures to get a response at all are errors.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

/// `reqwest`-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send {
        async move {
            debug!(method = %request.method, url = %request.url, "Sending request");

            let mut builder = self
                .client
                .request(request.method, &request.url)
                .header(header::ACCEPT, "application/json")
                .headers(request.headers);
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;

            debug!(status = %status, "Response received");
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_json_tolerates_garbage() {
        let response = ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: "not json".into(),
        };
        assert_eq!(response.json(), Value::Null);

        let response = ApiResponse::new(StatusCode::OK).with_json(&json!({"data": {}}));
        assert_eq!(response.json(), json!({"data": {}}));
        assert_eq!(
            response.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_request_headers_merge() {
        let mut headers = HeaderMap::new();
        headers.insert("uid", HeaderValue::from_static("a@b.c"));
        let request = ApiRequest::new(Method::GET, "http://api.dev").with_headers(headers);
        assert_eq!(request.header("uid"), Some("a@b.c"));
        assert_eq!(request.header("client"), None);
    }
}
