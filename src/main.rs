use anyhow::{Context, Result};
use event_vault::{app, config::AppConfig, db, errors, state::AppState};
use std::{env, fs, io::ErrorKind, path::Path};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    init_tracing();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    errors::set_development_mode(cfg.development);

    tracing::info!(
        addr = %cfg.addr(),
        storage_dir = %cfg.storage_dir,
        primary_bucket = ?cfg.primary.bucket,
        secondary_bucket = ?cfg.secondary.bucket,
        development = cfg.development,
        "starting event-vault"
    );

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url, 5).await?;

    // --- Handle migration mode ---
    if migrate {
        db::migrate(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::migrate(&pool).await?;

    // --- Initialize services ---
    let state = AppState::from_config(&cfg, pool).await?;
    let recovered = state.jobs.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "backup jobs interrupted by the previous shutdown were marked failed");
    }

    let shutdown = CancellationToken::new();
    let maintenance = state.maintenance(&cfg).spawn(shutdown.clone());

    // --- Build router ---
    let router = app(state);

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
    let signal_token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = maintenance.await {
        tracing::warn!(error = %err, "maintenance task ended abnormally");
    }
    Ok(())
}

/// `RUST_LOG` filters (default `event_vault=info`); `LOG_FORMAT=json`
/// switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("event_vault=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}
