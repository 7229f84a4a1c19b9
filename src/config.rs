use std::time::Duration;

use anyhow::Context;

use crate::AppResult;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE_URL: &str = "sqlite://renochat.db";
const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Process settings, read from the environment (and `.env` when present).
#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// `None` is a deployment fault: the server still starts, but every
    /// connection is refused with the misconfiguration close code.
    pub jwt_secret: Option<String>,
    pub heartbeat_interval: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[redacted]"))
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> AppResult<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Config> {
        let heartbeat_secs = match lookup("HEARTBEAT_INTERVAL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("HEARTBEAT_INTERVAL_SECS must be whole seconds, got {raw:?}"))
                .map_err(crate::AppError)?,
            None => DEFAULT_HEARTBEAT_SECS,
        };
        if heartbeat_secs == 0 {
            return Err("HEARTBEAT_INTERVAL_SECS must be greater than zero".into());
        }

        Ok(Config {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned()),
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            jwt_secret: lookup("JWT_SECRET").filter(|s| !s.is_empty()),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }
}
