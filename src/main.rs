use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use course_forge::{
    Launcher, SqliteStore,
    api::{AppState, router},
    config::Config,
    progress::ProgressStore,
    utils::{init_log, prepare_database_dir},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "Course content generation server", long_about = None)]
struct Args {
    /// Path to a toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// sqlx database url, overrides the config file
    #[arg(short, long)]
    database: Option<String>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
}

/// Drop finished jobs from the in-memory registry once they are older than `ttl`.
fn spawn_sweeper(progress: Arc<ProgressStore>, ttl: Duration) {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let pruned = progress.prune_finished(ttl);
            if pruned > 0 {
                info!("pruned {} finished jobs from memory", pruned);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let _guard = init_log(config.log_dir.clone());
    info!(ai = ?config.ai, pipeline = ?config.pipeline, "starting course-forge");

    prepare_database_dir(&config.database)?;
    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    let launcher = Arc::new(Launcher::from_config(&config, store));
    spawn_sweeper(
        launcher.progress().clone(),
        config.pipeline.finished_job_ttl(),
    );

    let app = router(AppState::new(launcher))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("listening on http://{}", listener.local_addr()?);
    info!(
        "OpenAPI document at http://{}/api-docs/openapi.json",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
