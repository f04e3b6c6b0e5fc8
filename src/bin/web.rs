//! Kronos HTTP 服务
//!
//! 启动: cargo run --bin kronos-web
//! 接口: POST /api/v1/agent/stream（SSE），GET /api/v1/health

use anyhow::Context;
use kronos::config::load_config;
use kronos::AgentRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None).context("Failed to load config")?;
    kronos::observability::init(cfg.app.log_json);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let runtime = AgentRuntime::from_config(cfg).context("Failed to build agent runtime")?;
    let app = kronos::api::router(runtime);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "kronos-web listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
