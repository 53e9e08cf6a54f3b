//! `abgatewayd` — the Anthropic-Messages-compatible API gateway over AWS
//! Bedrock (SPEC_FULL.md §2). Loads configuration, wires up the shared
//! process state, and serves the route table built in [`routers`].

mod app_context;
mod bedrock;
mod config;
mod errors;
mod ptc;
mod routers;
mod store;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use app_context::AppContext;
use config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings);

    info!(
        app_name = %settings.app_name,
        app_version = %settings.app_version,
        environment = %settings.environment,
        "starting gateway"
    );

    let session_timeout = Duration::from_secs(settings.ptc_session_timeout);
    let ctx = AppContext::build(settings).await?;
    let _sweeper = ctx.ptc_sessions.clone().spawn_sweeper(session_timeout);

    let addr = format!("{}:{}", ctx.settings.host, ctx.settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    let router = routers::build_router(ctx);
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let default_filter = if settings.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if settings.environment == "production" {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
