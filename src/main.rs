use renochat::{auth::AuthConfig, chat::ChatSettings, config::Config, db, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("renochat=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().map_err(|e| e.0)?;
    tracing::info!(?config, "starting chat server");
    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET is not set; every chat connection will be refused");
    }

    let db_pool = db::connect(&config.database_url).await.map_err(|e| e.0)?;

    let app_state = AppState::new(
        db_pool,
        AuthConfig::new(config.jwt_secret.clone()),
        ChatSettings {
            heartbeat_interval: config.heartbeat_interval,
        },
    );

    let app = renochat::app(app_state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("chat server listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
