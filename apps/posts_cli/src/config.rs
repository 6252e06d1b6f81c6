use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use posts_core::{RequestOrdering, DEFAULT_PAGE_SIZE};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "posts.toml";
pub const DEFAULT_API_URL: &str = "https://jsonplaceholder.typicode.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub page_size: usize,
    pub ordering: RequestOrdering,
    pub log_filter: String,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            page_size: DEFAULT_PAGE_SIZE,
            ordering: RequestOrdering::default(),
            log_filter: "info".into(),
            timeout_secs: 10,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    page_size: Option<usize>,
    ordering: Option<String>,
    log_filter: Option<String>,
    timeout_secs: Option<u64>,
}

/// Defaults, then the config file, then the environment.
///
/// A missing `posts.toml` is fine; a missing `--config` file is not. Values
/// that fail validation keep the previous value and are reported in the
/// returned list.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<(Settings, Vec<String>)> {
    let mut settings = Settings::default();
    let mut ignored = Vec::new();

    match explicit {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            apply_file(&mut settings, &raw, &mut ignored)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        }
        None => {
            if let Ok(raw) = fs::read_to_string(DEFAULT_CONFIG_FILE) {
                if let Err(err) = apply_file(&mut settings, &raw, &mut ignored) {
                    ignored.push(format!("{DEFAULT_CONFIG_FILE}: {err}"));
                }
            }
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok(), &mut ignored);
    Ok((settings, ignored))
}

pub fn apply_file(
    settings: &mut Settings,
    raw: &str,
    ignored: &mut Vec<String>,
) -> Result<(), toml::de::Error> {
    let file_cfg: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file_cfg.api_url {
        set_api_url(settings, "api_url", v, ignored);
    }
    if let Some(v) = file_cfg.page_size {
        set_page_size(settings, "page_size", v, ignored);
    }
    if let Some(v) = file_cfg.ordering {
        set_ordering(settings, "ordering", &v, ignored);
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
    if let Some(v) = file_cfg.timeout_secs {
        set_timeout(settings, "timeout_secs", v, ignored);
    }
    Ok(())
}

pub fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
    ignored: &mut Vec<String>,
) {
    if let Some(v) = lookup("POSTS_API_URL") {
        set_api_url(settings, "POSTS_API_URL", v, ignored);
    }
    if let Some(v) = lookup("APP__API_URL") {
        set_api_url(settings, "APP__API_URL", v, ignored);
    }

    if let Some(v) = lookup("APP__PAGE_SIZE") {
        match v.trim().parse::<usize>() {
            Ok(parsed) => set_page_size(settings, "APP__PAGE_SIZE", parsed, ignored),
            Err(_) => ignored.push(format!("APP__PAGE_SIZE={v}")),
        }
    }

    if let Some(v) = lookup("APP__ORDERING") {
        set_ordering(settings, "APP__ORDERING", &v, ignored);
    }

    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    if let Some(v) = lookup("APP__TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(parsed) => set_timeout(settings, "APP__TIMEOUT_SECS", parsed, ignored),
            Err(_) => ignored.push(format!("APP__TIMEOUT_SECS={v}")),
        }
    }
}

fn set_api_url(settings: &mut Settings, key: &str, value: String, ignored: &mut Vec<String>) {
    let value = value.trim();
    if value.is_empty() {
        ignored.push(format!("{key} (empty)"));
        return;
    }
    settings.api_url = value.to_string();
}

fn set_page_size(settings: &mut Settings, key: &str, value: usize, ignored: &mut Vec<String>) {
    if value == 0 {
        ignored.push(format!("{key}=0"));
        return;
    }
    settings.page_size = value;
}

fn set_ordering(settings: &mut Settings, key: &str, value: &str, ignored: &mut Vec<String>) {
    match value.parse::<RequestOrdering>() {
        Ok(ordering) => settings.ordering = ordering,
        Err(err) => ignored.push(format!("{key}: {err}")),
    }
}

fn set_timeout(settings: &mut Settings, key: &str, value: u64, ignored: &mut Vec<String>) {
    if value == 0 {
        ignored.push(format!("{key}=0"));
        return;
    }
    settings.timeout_secs = value;
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
