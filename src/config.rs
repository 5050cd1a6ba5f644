use anyhow::{Context, Result};
use chrono::FixedOffset;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,

    /// School calendar-day boundary, e.g. `+06:00`.
    pub school_utc_offset: FixedOffset,
    pub notify_timeout_ms: u64,
    pub directory_cache_ttl_secs: u64,

    // Rate limiting
    pub rate_events_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn or_default<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{key}: cannot parse `{raw}`: {e}"))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,

            school_utc_offset: or_default("SCHOOL_UTC_OFFSET", "+00:00")?,
            notify_timeout_ms: or_default("NOTIFY_TIMEOUT_MS", "3000")?,
            directory_cache_ttl_secs: or_default("DIRECTORY_CACHE_TTL_SECS", "300")?,

            rate_events_per_min: or_default("RATE_EVENTS_PER_MIN", "600")?,
            rate_protected_per_min: or_default("RATE_PROTECTED_PER_MIN", "1000")?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
        })
    }
}
