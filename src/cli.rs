use billing_core::config::Config;
use billing_core::provider::ProviderClient;
use billing_core::{BillingServices, ServiceSettings};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "billing-core")]
#[command(about = "Billing core - webhook dedup and credit settlement", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and background sweeps (default)
    Serve,

    /// Run a background sweep once and exit
    #[command(subcommand)]
    Sweep(SweepCommands),

    /// Auto top-up commands
    #[command(subcommand)]
    TopUp(TopUpCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum SweepCommands {
    /// Expire pending crypto payments past their deadline
    CryptoExpiry,

    /// Check every auto top-up organization against its threshold
    AutoTopUp,
}

#[derive(Subcommand)]
pub enum TopUpCommands {
    /// Check one organization and trigger a top-up if it is under threshold
    Check {
        /// Organization UUID
        #[arg(value_name = "ORG_ID")]
        organization_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn build_services(config: &Config) -> anyhow::Result<(PgPool, BillingServices)> {
    let pool = billing_core::db::create_pool(config).await?;
    let provider = Arc::new(ProviderClient::new(
        config.payment_provider_url.clone(),
        config.payment_provider_api_key.clone(),
    ));
    let services = BillingServices::postgres(pool.clone(), provider, ServiceSettings::from(config));
    Ok((pool, services))
}

pub async fn handle_sweep_crypto_expiry(config: &Config) -> anyhow::Result<()> {
    let (_, services) = build_services(config).await?;
    let expired = services.crypto_monitor.cleanup_expired_payments().await?;

    tracing::info!(count = expired.len(), "Crypto expiry sweep finished");
    println!("✓ Expired {} pending crypto payment(s)", expired.len());
    for id in expired {
        println!("  - {}", id);
    }
    Ok(())
}

pub async fn handle_sweep_auto_top_up(config: &Config) -> anyhow::Result<()> {
    let (_, services) = build_services(config).await?;
    let report = services.auto_top_up.bulk_check_auto_top_up().await?;

    println!("\n=== Auto Top-Up Sweep ===");
    println!("  Checked:   {}", report.checked);
    println!("  Triggered: {}", report.triggered);
    println!("  Failed:    {}", report.failed);
    if !report.errors.is_empty() {
        println!("\n⚠️  Errors:");
        for err in &report.errors {
            println!("  - {}", err);
        }
    }
    Ok(())
}

pub async fn handle_top_up_check(config: &Config, organization_id: Uuid) -> anyhow::Result<()> {
    let (_, services) = build_services(config).await?;
    let triggered = services
        .auto_top_up
        .check_and_trigger_auto_top_up(organization_id)
        .await?;

    if triggered {
        println!("✓ Auto top-up triggered for {}", organization_id);
    } else {
        println!("No auto top-up needed for {}", organization_id);
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = billing_core::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    billing_core::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    for (name, schedule) in [
        ("CRYPTO_SWEEP_SCHEDULE", &config.crypto_sweep_schedule),
        ("AUTO_TOP_UP_SWEEP_SCHEDULE", &config.auto_top_up_sweep_schedule),
    ] {
        schedule
            .parse::<cron::Schedule>()
            .map_err(|e| anyhow::anyhow!("{} is not a valid cron expression: {}", name, e))?;
    }

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Payment Provider URL: {}", config.payment_provider_url);
    println!(
        "  Payment Provider API Key: {}",
        if config.payment_provider_api_key.is_some() { "set" } else { "not set" }
    );
    println!("  Webhook Replay Window: {}s", config.webhook_replay_window_secs);
    println!("  Crypto Payment Expiry: {}m", config.crypto_payment_expiry_minutes);
    println!("  Auto Top-Up Cooldown: {}s", config.auto_top_up_cooldown_secs);
    println!("  Crypto Sweep Schedule: {}", config.crypto_sweep_schedule);
    println!("  Auto Top-Up Sweep Schedule: {}", config.auto_top_up_sweep_schedule);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
