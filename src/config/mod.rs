pub mod profiles;

use anyhow::Context;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use profiles::{Profile, ProfileDefaults};

pub const MAX_REPLAY_WINDOW_SECS: u64 = 86_400;
pub const MAX_CRYPTO_PAYMENT_EXPIRY_MINUTES: u64 = 10_080;
pub const MAX_AUTO_TOP_UP_COOLDOWN_SECS: u64 = 604_800;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server_port: u16,
    #[serde(skip_serializing)]
    pub database_url: String,
    pub database_max_connections: u32,
    pub payment_provider_url: String,
    #[serde(skip_serializing)]
    pub payment_provider_api_key: Option<String>,
    pub webhook_replay_window_secs: u64,
    pub crypto_payment_expiry_minutes: u64,
    pub auto_top_up_cooldown_secs: u64,
    pub crypto_sweep_schedule: String,
    pub auto_top_up_sweep_schedule: String,
}

#[derive(Debug)]
pub struct ConfigInfo {
    pub config: Config,
    pub profile: Profile,
    pub overrides: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<ConfigInfo> {
        dotenv().ok();
        Self::from_lookup(Profile::from_env(), |key| env::var(key).ok())
    }

    /// Builds a config from profile defaults overlaid with whatever `lookup`
    /// returns for each variable.
    pub fn from_lookup<F>(profile: Profile, lookup: F) -> anyhow::Result<ConfigInfo>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ProfileDefaults::for_profile(profile);
        let mut overrides = Vec::new();

        let mut string_var = |key: &str| {
            lookup(key).map(|v| {
                overrides.push(key.to_string());
                v
            })
        };

        let server_port_raw = string_var("SERVER_PORT");
        let database_url = string_var("DATABASE_URL")
            .or(defaults.database_url)
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let max_connections_raw = string_var("DATABASE_MAX_CONNECTIONS");
        let payment_provider_url =
            string_var("PAYMENT_PROVIDER_URL").unwrap_or(defaults.payment_provider_url);
        let payment_provider_api_key = string_var("PAYMENT_PROVIDER_API_KEY");
        let replay_raw = string_var("WEBHOOK_REPLAY_WINDOW_SECS");
        let expiry_raw = string_var("CRYPTO_PAYMENT_EXPIRY_MINUTES");
        let cooldown_raw = string_var("AUTO_TOP_UP_COOLDOWN_SECS");
        let crypto_sweep_schedule =
            string_var("CRYPTO_SWEEP_SCHEDULE").unwrap_or(defaults.crypto_sweep_schedule);
        let auto_top_up_sweep_schedule =
            string_var("AUTO_TOP_UP_SWEEP_SCHEDULE").unwrap_or(defaults.auto_top_up_sweep_schedule);

        Ok(ConfigInfo {
            config: Config {
                server_port: parse_or("SERVER_PORT", server_port_raw, defaults.server_port)?,
                database_url,
                database_max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    max_connections_raw,
                    defaults.database_max_connections,
                )?,
                payment_provider_url,
                payment_provider_api_key,
                webhook_replay_window_secs: parse_bounded(
                    "WEBHOOK_REPLAY_WINDOW_SECS",
                    replay_raw,
                    defaults.webhook_replay_window_secs,
                    MAX_REPLAY_WINDOW_SECS,
                )?,
                crypto_payment_expiry_minutes: parse_bounded(
                    "CRYPTO_PAYMENT_EXPIRY_MINUTES",
                    expiry_raw,
                    defaults.crypto_payment_expiry_minutes,
                    MAX_CRYPTO_PAYMENT_EXPIRY_MINUTES,
                )?,
                auto_top_up_cooldown_secs: parse_bounded(
                    "AUTO_TOP_UP_COOLDOWN_SECS",
                    cooldown_raw,
                    defaults.auto_top_up_cooldown_secs,
                    MAX_AUTO_TOP_UP_COOLDOWN_SECS,
                )?,
                crypto_sweep_schedule,
                auto_top_up_sweep_schedule,
            },
            profile,
            overrides,
        })
    }

    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.webhook_replay_window_secs.min(MAX_REPLAY_WINDOW_SECS))
    }

    pub fn crypto_payment_expiry(&self) -> chrono::Duration {
        let minutes = self
            .crypto_payment_expiry_minutes
            .min(MAX_CRYPTO_PAYMENT_EXPIRY_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }

    pub fn auto_top_up_cooldown(&self) -> chrono::Duration {
        let secs = self.auto_top_up_cooldown_secs.min(MAX_AUTO_TOP_UP_COOLDOWN_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, v)),
        None => Ok(default),
    }
}

/// Durations must be at least one unit and no larger than `max`.
fn parse_bounded(key: &str, raw: Option<String>, default: u64, max: u64) -> anyhow::Result<u64> {
    let value = parse_or(key, raw, default)?;
    anyhow::ensure!(
        (1..=max).contains(&value),
        "{} must be between 1 and {}, got {}",
        key,
        max,
        value
    );
    Ok(value)
}
