use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

const CACHE_DIR: &str = "service_record";
const DB_FILE: &str = "service_record.sqlite";

const DEFAULT_STATS_API_BASE: &str = "http://127.0.0.1:8080/stats";
const DEFAULT_CONTENT_API_BASE: &str = "http://127.0.0.1:8080/content";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PARALLELISM: usize = 6;
const DEFAULT_HISTORY_CAP: usize = 500;
const DEFAULT_RETRIES: u32 = 2;
// Launch of the first ranked season; older matches used a different scoring model.
const DEFAULT_STATS_CUTOFF: &str = "2021-11-15T00:00:00Z";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stats_api_base: String,
    pub content_api_base: String,
    pub request_timeout: Duration,
    pub fetch_parallelism: usize,
    pub match_history_cap: usize,
    pub fetch_retries: u32,
    pub stats_cutoff: DateTime<Utc>,
    pub db_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stats_api_base: DEFAULT_STATS_API_BASE.to_string(),
            content_api_base: DEFAULT_CONTENT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            fetch_parallelism: DEFAULT_PARALLELISM,
            match_history_cap: DEFAULT_HISTORY_CAP,
            fetch_retries: DEFAULT_RETRIES,
            stats_cutoff: parse_cutoff(DEFAULT_STATS_CUTOFF).unwrap_or_default(),
            db_path: default_db_path(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stats_api_base = env_string("STATS_API_BASE").unwrap_or(defaults.stats_api_base);
        let content_api_base =
            env_string("CONTENT_API_BASE").unwrap_or(defaults.content_api_base);
        let timeout_secs = env_parse::<u64>("REQUEST_TIMEOUT_SECS")
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, 120);
        let fetch_parallelism = env_parse::<usize>("FETCH_PARALLELISM")
            .unwrap_or(DEFAULT_PARALLELISM)
            .clamp(2, 32);
        let match_history_cap = env_parse::<usize>("MATCH_HISTORY_CAP")
            .unwrap_or(DEFAULT_HISTORY_CAP)
            .clamp(1, 5000);
        let fetch_retries = env_parse::<u32>("FETCH_RETRIES")
            .unwrap_or(DEFAULT_RETRIES)
            .min(5);
        let stats_cutoff = env_string("STATS_CUTOFF")
            .and_then(|raw| parse_cutoff(&raw))
            .unwrap_or(defaults.stats_cutoff);
        let db_path = env_string("SERVICE_RECORD_DB")
            .map(PathBuf::from)
            .or(defaults.db_path);

        Self {
            stats_api_base: trim_trailing_slash(stats_api_base),
            content_api_base: trim_trailing_slash(content_api_base),
            request_timeout: Duration::from_secs(timeout_secs),
            fetch_parallelism,
            match_history_cap,
            fetch_retries,
            stats_cutoff,
            db_path,
        }
    }
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

pub fn default_db_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(DB_FILE))
}

fn parse_cutoff(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse::<T>().ok())
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
