//! Internal error enums per subsystem, converging on the HTTP boundary into
//! the Anthropic error taxonomy (SPEC_FULL.md §7).

use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::routers::error as err;

#[derive(Debug, Error)]
pub enum BedrockError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backend client error: {0}")]
    ClientError(String),

    #[error("backend request timed out")]
    Timeout,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for BedrockError {
    fn into_response(self) -> Response {
        match self {
            BedrockError::InvalidRequest(msg) => err::bad_request("invalid_request_error", msg),
            BedrockError::ClientError(msg) => err::bad_gateway("bedrock_client_error", msg),
            BedrockError::Timeout => {
                err::gateway_timeout("bedrock_timeout", "Backend request timed out")
            }
            BedrockError::ModelNotFound(model) => err::not_found(
                "not_found_error",
                format!("No route available for model '{model}'"),
            ),
            BedrockError::Internal(msg) => err::internal_error("api_error", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum PtcError {
    #[error("docker/sandbox backend not available")]
    SandboxUnavailable,

    #[error("ptc session not found: {0}")]
    SessionNotFound(String),

    #[error("ptc session is busy")]
    SessionBusy,

    #[error("sandbox execution error: {0}")]
    Execution(String),

    #[error("unexpected sandbox generator completion")]
    UnexpectedCompletion,

    #[error(transparent)]
    Backend(#[from] BedrockError),
}

impl IntoResponse for PtcError {
    fn into_response(self) -> Response {
        match self {
            PtcError::SandboxUnavailable => err::service_unavailable(
                "service_unavailable",
                "The code execution sandbox is not available on this node",
            ),
            PtcError::SessionNotFound(message) => {
                err::not_found("ptc_session_not_found", message)
            }
            PtcError::SessionBusy => err::create_error(
                axum::http::StatusCode::CONFLICT,
                "ptc_session_busy",
                "This container already has a code execution in progress",
            ),
            PtcError::Execution(msg) => err::internal_error("ptc_execution_error", msg),
            PtcError::UnexpectedCompletion => {
                err::internal_error("ptc_internal_error", "Sandbox generator ended unexpectedly")
            }
            PtcError::Backend(inner) => inner.into_response(),
        }
    }
}
