use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use anyhow::Result;
use clap::Parser;
use logger::init_tracing;
use monitor::{HttpProbe, RetryController, TargetScheduler};
use tracing::{info, warn};

mod config;
mod database;
mod error;
mod pool;
mod routes;

use config::Config;
use database::{SqlStore, seed_demo_target};
use routes::AppState;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file to use instead of ~/.config/apimon/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_deref())?;
    config.apply_env_overrides()?;

    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    init_tracing(&config.logging.level);
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let pool = database::open(&config.database.path).await?;
    let store = Arc::new(SqlStore::new(pool));

    if config.seed.demo_target {
        seed_demo_target(store.as_ref()).await?;
    }

    let probe = Arc::new(HttpProbe::new()?);
    let controller = RetryController::new(probe)
        .with_max_jitter(config.scheduler.max_jitter())
        .with_max_backoff(config.scheduler.max_backoff());
    let scheduler = Arc::new(
        TargetScheduler::new(Arc::new(controller), store.clone(), store.clone())
            .with_overlap_policy(config.scheduler.overlap),
    );

    let summary = scheduler.start().await?;
    info!(targets = summary.armed, "monitoring started");

    let state = web::Data::new(AppState::new(store.clone(), store.clone(), scheduler.clone()));
    let bind = (config.server.bind.clone(), config.server.port);
    info!(bind = %bind.0, port = bind.1, "serving management API");

    // Returns once a shutdown signal has stopped the server
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(bind)?
        .run()
        .await?;

    shutdown(&scheduler, Duration::from_secs(config.server.shutdown_grace_s)).await;
    Ok(())
}

async fn shutdown(scheduler: &TargetScheduler, grace: Duration) {
    scheduler.stop().await;

    let in_flight = scheduler.in_flight();
    if in_flight > 0 {
        info!(in_flight, grace_s = grace.as_secs(), "waiting for running checks");
    }
    if tokio::time::timeout(grace, scheduler.wait_idle()).await.is_err() {
        warn!(in_flight = scheduler.in_flight(), "grace period elapsed, abandoning running checks");
    }

    info!("shutdown complete");
}
