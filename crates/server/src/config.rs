use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8443";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/server.db";
const DEFAULT_PRESENCE_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_OUTBOUND_BUFFER: i64 = 256;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    #[serde(default)]
    pub presence_cache_url: Option<String>,
    pub presence_ttl_seconds: u64,
    pub outbound_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            presence_cache_url: None,
            presence_ttl_seconds: DEFAULT_PRESENCE_TTL_SECONDS as u64,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER as usize,
        }
    }
}

impl Settings {
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_seconds.max(1))
    }
}

/// Defaults, then `server.toml` in the working directory, then `APP__*`
/// variables, then the legacy plain variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = load_settings_from(Path::new("server.toml"))?;
    apply_legacy_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn load_settings_from(file: &Path) -> anyhow::Result<Settings> {
    let settings = Config::builder()
        .set_default("bind_addr", DEFAULT_BIND_ADDR)?
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("presence_ttl_seconds", DEFAULT_PRESENCE_TTL_SECONDS)?
        .set_default("outbound_buffer", DEFAULT_OUTBOUND_BUFFER)?
        .add_source(File::from(file).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()
        .with_context(|| format!("failed to read settings from '{}'", file.display()))?
        .try_deserialize()
        .context("invalid server settings")?;
    Ok(settings)
}

/// `SERVER_BIND`, `DATABASE_URL` and `REDIS_URL` apply only when the
/// matching `APP__*` variable is absent.
fn apply_legacy_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if lookup("APP__BIND_ADDR").is_none() {
        if let Some(v) = lookup("SERVER_BIND") {
            settings.bind_addr = v;
        }
    }
    if lookup("APP__DATABASE_URL").is_none() {
        if let Some(v) = lookup("DATABASE_URL") {
            settings.database_url = v;
        }
    }
    if lookup("APP__PRESENCE_CACHE_URL").is_none() {
        if let Some(v) = lookup("REDIS_URL") {
            settings.presence_cache_url = Some(v);
        }
    }
    if settings
        .presence_cache_url
        .as_deref()
        .is_some_and(|url| url.trim().is_empty())
    {
        settings.presence_cache_url = None;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return DEFAULT_DATABASE_URL.to_string();
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
