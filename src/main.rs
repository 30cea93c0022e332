use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use whispers::{config::Config, db, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    tracing::info!("whispers v{} starting", env!("CARGO_PKG_VERSION"));

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    db::migrate(&db_pool).await.context("applying schema")?;

    let app_state = AppState::build(db_pool, &config).await;
    let app = router(app_state).layer(config.cors_layer()?);

    let listener = TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("whispers=info,tower_http=info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
