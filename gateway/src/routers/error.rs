//! HTTP error response construction and upstream-error sanitization.
//!
//! Grounded on the teacher's `routers::error` helper-function pattern: one
//! constructor per status code, a dedicated response header carrying a
//! machine-readable code alongside the Anthropic-shaped JSON body.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    #[serde(rename = "type")]
    response_type: &'static str,
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "type")]
    error_type: &'a str,
    message: &'a str,
}

pub const HEADER_ERROR_CODE: &str = "X-Gateway-Error-Code";

pub fn internal_error(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::BAD_REQUEST, code, message)
}

pub fn authentication_error(message: impl Into<String>) -> Response {
    create_error(StatusCode::UNAUTHORIZED, "authentication_error", message)
}

pub fn permission_error(message: impl Into<String>) -> Response {
    create_error(StatusCode::FORBIDDEN, "permission_error", message)
}

pub fn budget_exceeded(message: impl Into<String>) -> Response {
    create_error(
        StatusCode::PAYMENT_REQUIRED,
        "budget_exceeded_error",
        message,
    )
}

pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::NOT_FOUND, code, message)
}

pub fn rate_limited(message: impl Into<String>) -> Response {
    create_error(StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", message)
}

pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::SERVICE_UNAVAILABLE, code, message)
}

pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::BAD_GATEWAY, code, message)
}

pub fn gateway_timeout(code: impl Into<String>, message: impl Into<String>) -> Response {
    create_error(StatusCode::GATEWAY_TIMEOUT, code, message)
}

/// Generic status-code constructor, used for kinds that do not fit the
/// named helpers above (e.g. `409 Conflict` for a busy PTC session).
pub fn create_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    let code_str = code.into();
    let message_str = message.into();

    let mut headers = HeaderMap::with_capacity(1);
    if let Ok(val) = HeaderValue::from_str(&code_str) {
        headers.insert(HEADER_ERROR_CODE, val);
    }

    (
        status,
        headers,
        Json(ErrorResponse {
            response_type: "error",
            error: ErrorDetail {
                error_type: &code_str,
                message: &message_str,
            },
        }),
    )
        .into_response()
}

pub fn extract_error_code_from_response<B>(response: &Response<B>) -> &str {
    response
        .headers()
        .get(HEADER_ERROR_CODE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

static ACCOUNT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b\d{12}\b").expect("valid regex"));
static ARN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"arn:aws:[a-zA-Z0-9:/_.-]+").expect("valid regex"));

/// Sanitize upstream Bedrock error bodies before they reach the client:
/// strips AWS account ids and ARNs, which otherwise leak deployment
/// topology into client-visible error text. Non-JSON bodies pass through
/// unchanged.
pub fn sanitize_error_body(body: &str) -> String {
    let mut json: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return sanitize_plain_text(body),
    };

    let mut modified = false;
    if let Some(error) = json.get_mut("error").and_then(Value::as_object_mut) {
        if let Some(Value::String(msg)) = error.get("message") {
            let sanitized = sanitize_plain_text(msg);
            if sanitized != *msg {
                error.insert("message".into(), Value::String(sanitized));
                modified = true;
            }
        }
    }

    if modified {
        serde_json::to_string(&json).unwrap_or_else(|_| body.to_string())
    } else {
        body.to_string()
    }
}

fn sanitize_plain_text(text: &str) -> String {
    let sanitized = ARN_RE.replace_all(text, "[redacted-arn]");
    ACCOUNT_ID_RE
        .replace_all(&sanitized, "[redacted-account]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_arn() {
        let body = r#"{"error":{"message":"Access denied for arn:aws:iam::123456789012:role/BedrockRole","type":"api_error"}}"#;
        let result = sanitize_error_body(body);
        assert!(!result.contains("arn:aws:iam"));
        assert!(result.contains("Access denied"));
    }

    #[test]
    fn sanitize_strips_account_id() {
        let body = r#"{"error":{"message":"Cross-account role in account 123456789012 rejected","type":"api_error"}}"#;
        let result = sanitize_error_body(body);
        assert!(!result.contains("123456789012"));
    }

    #[test]
    fn sanitize_non_json_passthrough_with_redaction() {
        let body = "Bad Gateway";
        let result = sanitize_error_body(body);
        assert_eq!(result, "Bad Gateway");
    }

    #[test]
    fn create_error_sets_header_and_body() {
        let response = bad_request("invalid_request_error", "missing field 'model'");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            extract_error_code_from_response(&response),
            "invalid_request_error"
        );
    }
}
