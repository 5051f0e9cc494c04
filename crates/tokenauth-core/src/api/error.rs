use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that fail an operation outright.
///
/// Rejected credentials and network trouble are not errors at this level:
/// they come back as failure outcomes and signals. Only misuse does.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Sign-in attempt is {0}; reset it before submitting again")]
    AttemptNotIdle(&'static str),
}

/// Failure of the HTTP transport itself (no response received).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// A non-2xx response, classified by status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unprocessable request: {0}")]
    Unprocessable(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            422 => ApiError::Unprocessable(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Human-readable error strings for a failed response.
    ///
    /// Token-auth APIs answer with `{"errors": ["..."]}`, or for
    /// registration `{"errors": {"full_messages": ["..."], ...}}`. Those
    /// strings are returned verbatim. Any other body, including an empty
    /// error list, falls back to a single message describing the status so
    /// a failure always carries at least one string.
    pub fn messages(status: reqwest::StatusCode, body: &str) -> Vec<String> {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some(errors) = Self::error_strings(&value) {
                if !errors.is_empty() {
                    return errors;
                }
            }
        }
        vec![Self::from_status(status, body).to_string()]
    }

    fn error_strings(body: &Value) -> Option<Vec<String>> {
        match body.get("errors")? {
            Value::Array(items) => Some(items.iter().filter_map(string_of).collect()),
            Value::Object(fields) => {
                if let Some(Value::Array(full)) = fields.get("full_messages") {
                    return Some(full.iter().filter_map(string_of).collect());
                }
                Some(
                    fields
                        .iter()
                        .flat_map(|(field, messages)| match messages {
                            Value::Array(items) => items
                                .iter()
                                .filter_map(string_of)
                                .map(|m| format!("{} {}", field, m))
                                .collect::<Vec<_>>(),
                            other => string_of(other)
                                .map(|m| vec![format!("{} {}", field, m)])
                                .unwrap_or_default(),
                        })
                        .collect(),
                )
            }
            other => string_of(other).map(|m| vec![m]),
        }
    }
}

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, "x"),
            ApiError::Unauthorized(_)
        ));
        assert_eq!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        );
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert_eq!(ApiError::truncate_body("short"), "short");
    }

    #[test]
    fn test_messages_verbatim_list() {
        let body = r#"{"errors":["Invalid login credentials. Please try again."]}"#;
        assert_eq!(
            ApiError::messages(StatusCode::UNAUTHORIZED, body),
            vec!["Invalid login credentials. Please try again."]
        );
    }

    #[test]
    fn test_messages_full_messages_object() {
        let body = r#"{"status":"error","errors":{"email":["has already been taken"],"full_messages":["Email has already been taken"]}}"#;
        assert_eq!(
            ApiError::messages(StatusCode::UNPROCESSABLE_ENTITY, body),
            vec!["Email has already been taken"]
        );
    }

    #[test]
    fn test_messages_field_object_without_full_messages() {
        let body = r#"{"errors":{"password":["is too short"]}}"#;
        assert_eq!(
            ApiError::messages(StatusCode::UNPROCESSABLE_ENTITY, body),
            vec!["password is too short"]
        );
    }

    #[test]
    fn test_messages_fallback_for_unstructured_body() {
        let messages = ApiError::messages(StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>");
        assert_eq!(messages, vec!["Server error: <html>oops</html>"]);
    }

    #[test]
    fn test_messages_empty_error_list_still_reports_status() {
        let bodies = [
            r#"{"errors":[]}"#,
            r#"{"errors":{}}"#,
            r#"{"errors":{"full_messages":[]}}"#,
        ];
        for body in bodies {
            let messages = ApiError::messages(StatusCode::UNAUTHORIZED, body);
            assert_eq!(messages, vec![format!("Unauthorized: {}", body)]);
        }
    }
}
