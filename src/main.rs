use anyhow::{Context, Result};
use docintel::config::ServerConfig;
use docintel::credentials::{CredentialProvider, EnvCredentials};
use docintel::logging;
use docintel::providers::Engine;
use docintel::server::{router, AppState};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init("docintel=info,server=info,tower_http=info");

    let config = ServerConfig::from_env()?;

    for engine in [Engine::Qwen, Engine::OpenAi] {
        if EnvCredentials.api_key(engine).is_none() {
            warn!(
                engine = %engine,
                "No server-side {} API key configured; callers must supply apiKey",
                engine.display_name()
            );
        }
    }

    let state = Arc::new(AppState::new(
        config.endpoints.clone(),
        Arc::new(EnvCredentials),
    ));
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "Proxy server listening");
    println!("🚀 DocIntel proxy server running on http://{}", addr);
    println!("📋 Endpoints:");
    println!("   GET  /health                 - Health check");
    println!("   POST /api/qwen-proxy         - Qwen API proxy");
    println!("   POST /api/openai-proxy       - OpenAI API proxy");
    println!("   POST /api/ai-proxy           - Unified proxy (engine in body)");
    println!("   POST /functions/v1/ai-proxy  - Unified proxy (edge function path)");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
