//! Server configuration, loaded from the environment once at startup.

use std::path::PathBuf;

use anyhow::{bail, Context};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub debug: bool,

    /// Input to the challenge key derivation. Required, at least 32 chars.
    pub encryption_secret: String,
    pub allowed_origins: Vec<String>,
    pub allowed_hosts: Vec<String>,

    /// How long login challenges stay valid, in seconds.
    pub challenge_valid_seconds: i64,

    /// Root directory for encrypted chunk files.
    pub chunk_storage_path: PathBuf,

    pub database_url: String,

    /// Optional; enables the pub/sub broker and the shared ticket store.
    pub redis_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let encryption_secret = std::env::var("ENCRYPTION_SECRET")
            .context("ENCRYPTION_SECRET must be set")?;
        if encryption_secret.len() < 32 {
            bail!("ENCRYPTION_SECRET must be at least 32 characters");
        }

        Ok(Self {
            port: env_or("PORT", "3735").parse().context("invalid PORT")?,
            debug: env_bool("DEBUG"),
            encryption_secret,
            allowed_origins: split_and_trim(&env_or("ALLOWED_ORIGINS", "*")),
            allowed_hosts: split_and_trim(&env_or("ALLOWED_HOSTS", "*")),
            challenge_valid_seconds: env_or("CHALLENGE_VALID_SECONDS", "300")
                .parse()
                .context("invalid CHALLENGE_VALID_SECONDS")?,
            chunk_storage_path: PathBuf::from(env_or("CHUNK_STORAGE_PATH", "./data/chunks")),
            database_url: env_or("DATABASE_URL", "sqlite://data/server.db?mode=rwc"),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str) -> bool {
    matches!(
        std::env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn split_and_trim(value: &str) -> Vec<String> {
    let parts: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        vec!["*".to_string()]
    } else {
        parts
    }
}
