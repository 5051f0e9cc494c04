//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use crate::api::error::TransportError;
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::auth::credentials::{ACCESS_TOKEN, CLIENT, EXPIRY, TOKEN_TYPE, UID};

/// Transport that replays scripted responses in order and records every
/// request it was asked to send. Running out of responses is reported as a
/// transport failure.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<ApiResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<ApiResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Hold each response for `delay` before returning it.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send {
        async move {
            self.requests.lock().unwrap().push(request);
            let next = self.responses.lock().unwrap().pop_front();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            next.ok_or_else(|| TransportError::Other("connection refused".to_string()))
        }
    }
}

/// A 200 sign-in style response carrying a complete rotated header set.
pub(crate) fn rotated_response(token: &str, uid: &str) -> ApiResponse {
    ApiResponse::new(StatusCode::OK)
        .with_header(ACCESS_TOKEN, token)
        .with_header(CLIENT, "client-1")
        .with_header(UID, uid)
        .with_header(EXPIRY, "1893456000")
        .with_header(TOKEN_TYPE, "Bearer")
        .with_json(&json!({ "data": { "uid": uid } }))
}
