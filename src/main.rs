mod cli;

use billing_core::config::Config;
use billing_core::health::{HealthChecker, PostgresChecker};
use billing_core::services::{AutoTopUpSweepJob, CryptoExpiryJob, JobScheduler};
use billing_core::AppState;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, DbCommands, SweepCommands, TopUpCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("LOG_FORMAT").map_or(false, |v| v == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let cli = Cli::parse();

    let config_info = Config::from_env()?;
    tracing::info!(
        profile = config_info.profile.as_str(),
        overrides = ?config_info.overrides,
        "Configuration loaded"
    );
    let config = config_info.config;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Sweep(SweepCommands::CryptoExpiry) => cli::handle_sweep_crypto_expiry(&config).await,
        Commands::Sweep(SweepCommands::AutoTopUp) => cli::handle_sweep_auto_top_up(&config).await,
        Commands::TopUp(TopUpCommands::Check { organization_id }) => {
            cli::handle_top_up_check(&config, organization_id).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let (pool, services) = cli::build_services(&config).await?;
    billing_core::db::run_migrations(&pool).await?;

    let scheduler = JobScheduler::new();
    scheduler
        .register_job(Box::new(CryptoExpiryJob::new(
            services.crypto_monitor.clone(),
            config.crypto_sweep_schedule.clone(),
        )))
        .await?;
    scheduler
        .register_job(Box::new(AutoTopUpSweepJob::new(
            services.auto_top_up.clone(),
            config.auto_top_up_sweep_schedule.clone(),
        )))
        .await?;
    scheduler.start().await?;

    let app_state = AppState {
        services,
        health_checker: Arc::new(
            HealthChecker::new().add_checker(Box::new(PostgresChecker::new(pool.clone()))),
        ),
    };
    let app = billing_core::create_app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    scheduler.stop().await?;
    Ok(())
}
