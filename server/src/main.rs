use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use server::{build_router, config::ServerConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting chat relay server...");

    let config = ServerConfig::from_env()?;
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, upstream_timeout={}s, audio_format={:?}",
        config.port, config.rate_limit_per_minute, config.upstream_timeout_secs, config.audio_format
    );
    info!(
        "Provider: base_url={}, chat_model={}, tts_model={}, voice={}, stt_model={}",
        config.openai_base_url,
        config.chat_model,
        config.speech.tts_model,
        config.speech.voice,
        config.speech.stt_model
    );

    let port = config.port;
    let state = AppState::from_config(config)?;
    let app = build_router(state)?;

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
