use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Zulip credentials. Present only when all three variables are set.
#[derive(Debug, Clone)]
pub struct ZulipCredentials {
    pub site: String,
    pub email: String,
    pub api_key: String,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub database_url: String,
    pub listing_url: String,
    pub paper_dir: PathBuf,
    pub listing_dir: PathBuf,
    pub index_dir: PathBuf,
    pub markdown_dir: PathBuf,
    pub zulip: Option<ZulipCredentials>,
    pub zulip_stream: String,
    pub zulip_bot_name: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub max_retry: i64,
    pub download_attempts: u32,
    pub download_delay: Duration,
    pub http_timeout: Duration,
    pub sleep_min_secs: u64,
    pub sleep_max_secs: u64,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let sleep_min_secs = parse_env("SLEEP_MIN_SECS", 1800u64)?;
        let sleep_max_secs = parse_env("SLEEP_MAX_SECS", 3600u64)?;
        if sleep_min_secs > sleep_max_secs {
            bail!("SLEEP_MIN_SECS ({sleep_min_secs}) must not exceed SLEEP_MAX_SECS ({sleep_max_secs})");
        }

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            database_url: env_or("DATABASE_URL", "sqlite://papers.db"),
            listing_url: env_or("LISTING_URL", "https://huggingface.co/papers"),
            paper_dir: env_or("PAPER_DIR", "paper_pdf").into(),
            listing_dir: env_or("LISTING_DIR", "huggingface_dailypaper").into(),
            index_dir: env_or("INDEX_DIR", "embedding_db").into(),
            markdown_dir: env_or("MARKDOWN_DIR", "md").into(),
            zulip: zulip_from_env(),
            zulip_stream: env_or("ZULIP_STREAM", "Paper_Reader"),
            zulip_bot_name: env_or("ZULIP_BOT_NAME", "PaperReaderBot"),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            embedding_model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            max_retry: parse_env("MAX_RETRY", 3i64)?,
            download_attempts: parse_env("DOWNLOAD_ATTEMPTS", 10u32)?,
            download_delay: Duration::from_millis(parse_env("DOWNLOAD_DELAY_MS", 2000u64)?),
            http_timeout: Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS", 30u64)?),
            sleep_min_secs,
            sleep_max_secs,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn zulip_from_env() -> Option<ZulipCredentials> {
    Some(ZulipCredentials {
        site: optional_env("ZULIP_SITE")?,
        email: optional_env("ZULIP_EMAIL")?,
        api_key: optional_env("ZULIP_API_KEY")?,
    })
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid number: {e}")),
        None => Ok(default),
    }
}
