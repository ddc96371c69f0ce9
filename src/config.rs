#![forbid(unsafe_code)]

//! Runtime settings for a harvest run.
//!
//! Values are layered: built-in defaults, then a `.env` style file, then the
//! process environment, then explicit overrides (usually CLI flags). The
//! target catalog itself is a separate JSON file, see [`crate::catalog`].

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::subtitles::DEFAULT_YT_DLP;
use crate::youtube::DEFAULT_API_BASE;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_ARCHIVE_ROOT: &str = "./YouTube";
pub const DEFAULT_CATALOG_PATH: &str = "./targets.json";
pub const DEFAULT_CHECKPOINT_DIR: &str = "./checkpoints";
pub const DEFAULT_LANGUAGE: &str = "es";
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Upper bound the discovery endpoints accept for `maxResults`.
pub const MAX_PAGE_SIZE: u32 = 50;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_COMMENT_PAGES: u32 = 1;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    pub archive_root: PathBuf,
    pub catalog_path: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub language: String,
    pub page_size: u32,
    pub workers: usize,
    pub include_replies: bool,
    pub comment_pages: u32,
    pub api_base: String,
    pub request_timeout: Duration,
    pub yt_dlp: PathBuf,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from(DEFAULT_ARCHIVE_ROOT),
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            language: DEFAULT_LANGUAGE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            workers: DEFAULT_WORKERS,
            include_replies: false,
            comment_pages: DEFAULT_COMMENT_PAGES,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            yt_dlp: PathBuf::from(DEFAULT_YT_DLP),
        }
    }
}

/// Values that win over both the env file and the environment.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub env_path: Option<PathBuf>,
    pub archive_root: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    pub workers: Option<usize>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<HarvestSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_settings(&file_vars, env_var_string, overrides))
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> HarvestSettings {
    let defaults = HarvestSettings::default();
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let archive_root = overrides
        .archive_root
        .or_else(|| lookup("HARVEST_ROOT").map(PathBuf::from))
        .unwrap_or(defaults.archive_root);
    let catalog_path = overrides
        .catalog_path
        .or_else(|| lookup("HARVEST_CATALOG").map(PathBuf::from))
        .unwrap_or(defaults.catalog_path);
    let checkpoint_dir = overrides
        .checkpoint_dir
        .or_else(|| lookup("HARVEST_CHECKPOINTS").map(PathBuf::from))
        .unwrap_or(defaults.checkpoint_dir);
    let language = lookup("HARVEST_LANGUAGE").unwrap_or(defaults.language);
    let page_size = lookup("HARVEST_PAGE_SIZE")
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(defaults.page_size)
        .clamp(1, MAX_PAGE_SIZE);
    let workers = overrides
        .workers
        .or_else(|| lookup("HARVEST_WORKERS").and_then(|value| value.parse::<usize>().ok()))
        .unwrap_or(defaults.workers)
        .max(1);
    let include_replies = lookup("HARVEST_INCLUDE_REPLIES")
        .and_then(|value| parse_bool(&value))
        .unwrap_or(defaults.include_replies);
    let comment_pages = lookup("HARVEST_COMMENT_PAGES")
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(defaults.comment_pages)
        .max(1);
    let api_base = lookup("HARVEST_API_BASE").unwrap_or(defaults.api_base);
    let request_timeout = lookup("HARVEST_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(defaults.request_timeout);
    let yt_dlp = lookup("HARVEST_YT_DLP")
        .map(PathBuf::from)
        .unwrap_or(defaults.yt_dlp);

    HarvestSettings {
        archive_root,
        catalog_path,
        checkpoint_dir,
        language,
        page_size,
        workers,
        include_replies,
        comment_pages,
        api_base,
        request_timeout,
        yt_dlp,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Parses `KEY=value` lines, tolerating `export` prefixes, quotes and
/// comments. A missing file yields no variables.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
