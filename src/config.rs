use std::time::Duration;

use anyhow::Context;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match lookup("FEEDBACK_DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("FEEDBACK_DB_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let sweep_secs = match lookup("FEEDBACK_SWEEP_INTERVAL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("FEEDBACK_SWEEP_INTERVAL_SECS is not a number: {raw}"))?,
            None => DEFAULT_SWEEP_INTERVAL_SECS,
        };

        Ok(Config {
            database_url,
            max_connections: max_connections.max(1),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        })
    }
}

impl LogFormat {
    /// Read before anything else so startup failures are logged too.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("FEEDBACK_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}
