//! `/v1/messages` and `/v1/messages/count_tokens` handlers (SPEC_FULL.md §2,
//! §4.1-§4.2, §4.5-§4.6). Dispatches each request through the PTC classifier:
//! PTC-eligible requests go to [`crate::ptc::PtcOrchestrator`]; everything
//! else goes straight through the Bedrock request/response converters.
//! Streaming is always synthesized from a complete [`Message`] via [`sse`]
//! (SPEC_FULL.md §4.6.6 "exactly one SSE-synthesis code path").

pub mod sse;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tokio::sync::mpsc;

use anthropic_protocol::messages::{
    ContainerRef, CountMessageTokensRequest, CountMessageTokensResponse, CreateMessageRequest,
    Message,
};
use anthropic_protocol::validated::ValidatedJson;

use crate::app_context::AppContext;
use crate::bedrock::{build_count_tokens_request, is_anthropic_family, prepare_request, resolve_model_id};
use crate::bedrock::convert_response::native_response_to_message;
use crate::bedrock::tokens::estimate_token_count;
use crate::bedrock::BackendResponse;
use crate::errors::{BedrockError, PtcError};
use crate::ptc::is_ptc_request;

const SSE_CHANNEL_CAPACITY: usize = 64;

fn anthropic_beta_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("anthropic-beta")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn container_id_header(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn create_message(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    ValidatedJson(mut request): ValidatedJson<CreateMessageRequest>,
) -> Response {
    let beta_header = anthropic_beta_header(&headers);
    if let Some(container_id) = container_id_header(&headers, &ctx.settings.ptc_container_id_header) {
        request.container.get_or_insert(ContainerRef { id: container_id });
    }

    let wants_stream = request.stream.unwrap_or(false);

    if is_ptc_request(&ctx.settings, &request, beta_header.as_deref()) {
        return handle_ptc(ctx, request, beta_header, wants_stream).await;
    }

    handle_plain(ctx, request, beta_header, wants_stream).await
}

async fn handle_ptc(
    ctx: AppContext,
    request: CreateMessageRequest,
    beta_header: Option<String>,
    wants_stream: bool,
) -> Response {
    match ctx.ptc_orchestrator.handle(&request, beta_header.as_deref()).await {
        Ok(outcome) => respond(outcome.message, wants_stream).await,
        Err(err) => ptc_error_response(err),
    }
}

fn ptc_error_response(err: PtcError) -> Response {
    err.into_response()
}

async fn handle_plain(
    ctx: AppContext,
    request: CreateMessageRequest,
    beta_header: Option<String>,
    wants_stream: bool,
) -> Response {
    let resolved_model_id = resolve_model_id(&request.model, &ctx.model_mapping);

    let prepared = match prepare_request(
        &request,
        &resolved_model_id,
        beta_header.as_deref(),
        ctx.settings.prompt_caching_enabled,
    ) {
        Ok(prepared) => prepared,
        Err(err) => return bedrock_error_response(err),
    };

    let backend_response = match ctx.invoker.invoke(prepared).await {
        Ok(response) => response,
        Err(err) => return bedrock_error_response(err),
    };

    let message = match backend_response {
        BackendResponse::Native(body) => match native_response_to_message(&body) {
            Ok(message) => message,
            Err(err) => return bedrock_error_response(err),
        },
        BackendResponse::Converse(message) => message,
    };

    respond(message, wants_stream).await
}

fn bedrock_error_response(err: BedrockError) -> Response {
    err.into_response()
}

async fn respond(message: Message, wants_stream: bool) -> Response {
    if !wants_stream {
        return Json(message).into_response();
    }

    let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        sse::emit_message(&tx, &message).await;
    });
    sse::build_sse_response(rx)
}

/// Counts input tokens for a would-be request. Anthropic-family models call
/// Bedrock's `count_tokens` API as the primary path, falling back to the
/// CJK-aware estimator on error or a zero result; every other model family
/// always uses the estimator (SPEC_FULL.md §4.4).
pub async fn count_tokens(
    State(ctx): State<AppContext>,
    ValidatedJson(request): ValidatedJson<CountMessageTokensRequestBody>,
) -> Response {
    let request = request.0;
    let resolved_model_id = resolve_model_id(&request.model, &ctx.model_mapping);

    let input_tokens = if is_anthropic_family(&resolved_model_id) {
        match build_count_tokens_request(&request, &resolved_model_id) {
            Ok(converse_request) => match ctx.invoker.count_tokens(converse_request).await {
                Ok(Some(count)) => count,
                Ok(None) | Err(_) => estimate_token_count(&request),
            },
            Err(_) => estimate_token_count(&request),
        }
    } else {
        estimate_token_count(&request)
    };

    Json(CountMessageTokensResponse { input_tokens }).into_response()
}

/// Wraps [`CountMessageTokensRequest`] so it can implement the
/// [`anthropic_protocol::validated::Normalizable`] bound `ValidatedJson`
/// requires, without adding a no-op impl to the shared protocol crate.
pub struct CountMessageTokensRequestBody(pub CountMessageTokensRequest);

impl<'de> serde::Deserialize<'de> for CountMessageTokensRequestBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        CountMessageTokensRequest::deserialize(deserializer).map(CountMessageTokensRequestBody)
    }
}

impl validator::Validate for CountMessageTokensRequestBody {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        Ok(())
    }
}

impl anthropic_protocol::validated::Normalizable for CountMessageTokensRequestBody {
    fn normalize(&mut self) {}
}
