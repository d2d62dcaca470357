use std::time::Duration;

use presence_chat::{config::Settings, db, telemetry, AppState};
use tokio_util::sync::CancellationToken;

const SESSION_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let settings = Settings::from_env()?;
    let db_pool = db::connect(&settings.database_url).await?;

    if settings.reset_presence_on_boot {
        let cleared = db::reset_presence(&db_pool).await?;
        tracing::info!(cleared, "cleared stale online flags");
    }

    let bind_addr = settings.bind_addr;
    let app_state = AppState::new(db_pool, settings);
    let shutdown = app_state.shutdown.clone();
    let sessions = app_state.sessions.clone();
    let app = presence_chat::app(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Upgraded sockets outlive the HTTP server; let each session close itself.
    shutdown.cancel();
    sessions.close();
    if tokio::time::timeout(SESSION_DRAIN, sessions.wait()).await.is_err() {
        tracing::warn!(remaining = sessions.len(), "connection sessions did not close in time");
    }
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("shutting down");
    shutdown.cancel();
}
