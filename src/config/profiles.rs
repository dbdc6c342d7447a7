use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Staging,
    Production,
}

impl Profile {
    pub fn from_env() -> Self {
        std::env::var("APP_PROFILE")
            .ok()
            .and_then(|s| Self::parse(&s))
            .unwrap_or(Self::Development)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "staging" | "stage" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileDefaults {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub payment_provider_url: String,
    pub webhook_replay_window_secs: u64,
    pub crypto_payment_expiry_minutes: u64,
    pub auto_top_up_cooldown_secs: u64,
    pub crypto_sweep_schedule: String,
    pub auto_top_up_sweep_schedule: String,
}

impl ProfileDefaults {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Development => Self {
                server_port: 3000,
                database_url: None,
                database_max_connections: 5,
                payment_provider_url: "http://localhost:12111".to_string(),
                webhook_replay_window_secs: 300,
                crypto_payment_expiry_minutes: 30,
                auto_top_up_cooldown_secs: 900,
                crypto_sweep_schedule: "0 * * * * *".to_string(),
                auto_top_up_sweep_schedule: "0 */5 * * * *".to_string(),
            },
            Profile::Staging => Self {
                server_port: 8080,
                database_url: None,
                database_max_connections: 10,
                payment_provider_url: "https://api.stripe.com".to_string(),
                webhook_replay_window_secs: 300,
                crypto_payment_expiry_minutes: 30,
                auto_top_up_cooldown_secs: 900,
                crypto_sweep_schedule: "0 * * * * *".to_string(),
                auto_top_up_sweep_schedule: "0 */5 * * * *".to_string(),
            },
            Profile::Production => Self {
                server_port: 8080,
                database_url: None,
                database_max_connections: 20,
                payment_provider_url: "https://api.stripe.com".to_string(),
                webhook_replay_window_secs: 300,
                crypto_payment_expiry_minutes: 30,
                auto_top_up_cooldown_secs: 900,
                crypto_sweep_schedule: "0 * * * * *".to_string(),
                auto_top_up_sweep_schedule: "0 */5 * * * *".to_string(),
            },
        }
    }
}
