//! HTTP server entry point: public read-only API + job submission API.

use std::sync::Arc;

use kenter_intel_backend::{config, create_pool, create_router, run_migrations, AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();

    let app_config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        environment = ?app_config.environment,
        "starting kenter-intel-backend"
    );

    let pool = create_pool(&app_config.database).await?;
    run_migrations(&pool).await?;

    let state = AppState::new(pool, app_config.clone());
    let router = create_router(state);

    let address = app_config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
