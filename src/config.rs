use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::PathBuf;

use crate::db::Database;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Runtime configuration, read from the environment (and `.env` when present).
///
/// The check interval has no default: the operator picks the cadence.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub resume: Option<String>,
    /// Raw `CHECK_INTERVAL`, parsed only by the commands that need it.
    pub check_interval: Option<String>,
    pub firecrawl_api_key: Option<String>,
    pub match_model: String,
    pub discord_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        allow_missing_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            db_path: get("CAREERWATCH_DB")
                .map(PathBuf::from)
                .unwrap_or_else(Database::default_path),
            resume: get("RESUME_URL"),
            check_interval: get("CHECK_INTERVAL"),
            firecrawl_api_key: get("FIRECRAWL_API_KEY"),
            match_model: get("MATCH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            discord_webhook_url: get("DISCORD_WEBHOOK_URL"),
        })
    }

    /// The flag wins over `CHECK_INTERVAL`; one of them must be set.
    pub fn interval(&self, flag: Option<&str>) -> Result<chrono::Duration> {
        match flag {
            Some(raw) => parse_interval(raw),
            None => match &self.check_interval {
                Some(raw) => parse_interval(raw).context("CHECK_INTERVAL is not a valid interval"),
                None => Err(anyhow!(
                    "No check interval configured. Pass --interval or set CHECK_INTERVAL (e.g. 15m, 7d)."
                )),
            },
        }
    }
}

// A missing .env is fine; a malformed one is reported.
fn allow_missing_env_file<T>(loaded: dotenvy::Result<T>) -> Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("Failed to load .env file"),
    }
}

/// Parses intervals like `15m`, `2h`, `7d`, `1w`. A bare number means minutes.
pub fn parse_interval(raw: &str) -> Result<chrono::Duration> {
    let re = regex::Regex::new(r"(?i)^\s*(\d+)\s*(m|min|mins|minutes?|h|hours?|d|days?|w|weeks?)?\s*$")?;
    let caps = re
        .captures(raw)
        .ok_or_else(|| anyhow!("Invalid interval '{}'. Use forms like 15m, 2h, 7d, 1w", raw))?;

    let amount: i64 = caps[1]
        .parse()
        .with_context(|| format!("Interval amount out of range: {}", raw))?;
    if amount == 0 {
        return Err(anyhow!("Interval must be greater than zero"));
    }

    let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let duration = match unit.chars().next() {
        None | Some('m') => chrono::Duration::try_minutes(amount),
        Some('h') => chrono::Duration::try_hours(amount),
        Some('d') => chrono::Duration::try_days(amount),
        Some('w') => chrono::Duration::try_weeks(amount),
        Some(_) => None,
    };
    duration.ok_or_else(|| anyhow!("Interval too large: {}", raw))
}
