//! Environment-based settings, prefix `TS_`. Loaded once at startup via
//! `dotenvy` (for local `.env` files) layered under `config`'s environment
//! source, mirroring the original settings object field-for-field even
//! though the HTTP surface (CORS/JWT) is out of scope here.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default = "default_jwt_expire_minutes")]
    pub jwt_expire_minutes: i64,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_ids: Vec<i64>,
}

fn default_database_url() -> String {
    "sqlite://trading.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_jwt_expire_minutes() -> i64 {
    1440
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let cfg = config::Config::builder()
            .set_default("database_url", default_database_url())?
            .set_default("log_level", default_log_level())?
            .set_default("jwt_secret", default_jwt_secret())?
            .set_default("jwt_algorithm", default_jwt_algorithm())?
            .set_default("jwt_expire_minutes", default_jwt_expire_minutes())?
            .add_source(config::Environment::with_prefix("TS").try_parsing(true).list_separator(","))
            .build()?;

        cfg.try_deserialize().map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_environment() {
        std::env::remove_var("TS_DATABASE_URL");
        let settings = Settings::load().expect("settings should load from defaults alone");
        assert_eq!(settings.database_url, default_database_url());
        assert_eq!(settings.jwt_expire_minutes, 1440);
    }
}
