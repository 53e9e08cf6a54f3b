//! Route table assembly (SPEC_FULL.md §2 "External interfaces").

pub mod anthropic;
pub mod error;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app_context::AppContext;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn build_router(ctx: AppContext) -> Router {
    let timeout = std::time::Duration::from_secs(ctx.settings.bedrock_timeout);
    let api_prefix = ctx.settings.api_prefix.clone();

    let messages_path = format!("{api_prefix}/messages");
    let count_tokens_path = format!("{api_prefix}/messages/count_tokens");

    Router::new()
        .route(&messages_path, post(anthropic::create_message))
        .route(&count_tokens_path, post(anthropic::count_tokens))
        .route("/health", get(health::health))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness))
        .route("/health/ptc", get(health::ptc_health))
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
            MakeRequestUuid,
        ))
        .with_state(ctx)
}
