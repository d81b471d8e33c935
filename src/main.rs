use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path};
use tiered_storage::{
    config::{AppConfig, RunMode},
    db, routes,
    state::AppState,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        database_url = %cfg.database_url,
        fast_dir = %cfg.fast_dir,
        ?mode,
        "starting tiered-storage"
    );
    if cfg.uses_dev_secret() {
        tracing::warn!("locator secret not configured; using the development default");
    }

    // --- Ensure the Fast-tier directory exists ---
    if !Path::new(&cfg.fast_dir).exists() {
        fs::create_dir_all(&cfg.fast_dir)?;
        tracing::info!("Created fast-tier directory at {}", cfg.fast_dir);
    }

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let state = AppState::from_config(&cfg, db).await;

    // --- One-shot sync for cron-style scheduling ---
    if mode == RunMode::SyncOnce {
        let summary = state.sync.run_sync().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
