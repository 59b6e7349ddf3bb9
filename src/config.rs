use std::env;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{Datelike, Utc};

use crate::names::OrgAliases;

const CACHE_DIR: &str = "statline";
const DB_FILE: &str = "statline.sqlite";
const DEFAULT_STATS_API: &str = "https://statsapi.mlb.com/api/v1";
const DEFAULT_RANKINGS_BASE: &str = "https://www.teamrankings.com/mlb/stat";
const DEFAULT_FIELDING_URL: &str = "https://www.baseball-reference.com/leagues/majors/fielding.shtml";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const DEFAULT_REFERER: &str = "https://www.google.com/";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub db_path: PathBuf,
    pub season: i32,
    pub stats_api: String,
    pub rankings_base: String,
    pub fielding_url: String,
    pub user_agent: String,
    pub referer: String,
    pub aliases_path: Option<PathBuf>,
    pub fetch_parallelism: usize,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let db_path = env_string("STATLINE_DB")
            .map(PathBuf::from)
            .or_else(default_db_path)
            .unwrap_or_else(|| PathBuf::from(DB_FILE));
        let season = env_string("STATLINE_SEASON")
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or_else(|| Utc::now().year());

        Self {
            db_path,
            season,
            stats_api: env_string("STATLINE_STATS_API")
                .unwrap_or_else(|| DEFAULT_STATS_API.to_string()),
            rankings_base: env_string("STATLINE_RANKINGS_BASE")
                .unwrap_or_else(|| DEFAULT_RANKINGS_BASE.to_string()),
            fielding_url: env_string("STATLINE_FIELDING_URL")
                .unwrap_or_else(|| DEFAULT_FIELDING_URL.to_string()),
            user_agent: env_string("STATLINE_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            referer: env_string("STATLINE_REFERER").unwrap_or_else(|| DEFAULT_REFERER.to_string()),
            aliases_path: env_string("STATLINE_ALIASES").map(PathBuf::from),
            fetch_parallelism: fetch_parallelism(),
        }
    }

    /// Built-in team aliases plus the optional alias file.
    pub fn load_aliases(&self) -> Result<OrgAliases> {
        let mut aliases = OrgAliases::mlb_default();
        if let Some(path) = self.aliases_path.as_deref() {
            aliases.extend_from_json(path)?;
        }
        Ok(aliases)
    }
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
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

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn fetch_parallelism() -> usize {
    env::var("FETCH_PARALLELISM")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(6)
        .clamp(2, 32)
}
