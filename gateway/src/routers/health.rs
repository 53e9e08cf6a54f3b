//! Health and readiness endpoints (SPEC_FULL.md §6): plain liveness/readiness
//! for load balancers, plus a PTC-specific diagnostic surface exposing
//! sandbox image availability and the node's local session state — load
//! balancers must route continuation turns back to the same node, so this
//! endpoint exists to make that sticky-routing requirement debuggable.

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::app_context::AppContext;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    app_name: String,
    app_version: String,
    environment: String,
}

pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "ok",
        app_name: ctx.settings.app_name.clone(),
        app_version: ctx.settings.app_version.clone(),
        environment: ctx.settings.environment.clone(),
    })
}

pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

pub async fn readiness(State(ctx): State<AppContext>) -> impl IntoResponse {
    let _ = &ctx;
    Json(serde_json::json!({ "status": "ready" }))
}

const SAMPLE_SIZE: usize = 10;

#[derive(Serialize)]
struct PtcHealth {
    programmatic_tool_calling_enabled: bool,
    sandbox_image_available: bool,
    active_session_count: usize,
    sample_session_ids: Vec<String>,
    serving_instance: String,
    session_timeout_secs: u64,
}

/// Diagnostic surface for PTC sticky routing: which node this is, how many
/// sessions it currently holds, and whether the sandbox image is pulled.
pub async fn ptc_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    let serving_instance =
        std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-instance".to_string());

    Json(PtcHealth {
        programmatic_tool_calling_enabled: ctx.settings.enable_programmatic_tool_calling,
        sandbox_image_available: ctx.sandbox.is_image_available(),
        active_session_count: ctx.ptc_sessions.len(),
        sample_session_ids: ctx.ptc_sessions.sample_ids(SAMPLE_SIZE),
        serving_instance,
        session_timeout_secs: ctx.settings.ptc_session_timeout,
    })
}
