//! Environment bootstrap for Trellis: project `.env` and XDG `config.toml`,
//! applied to the process environment with priority **existing env > .env > XDG**.
//!
//! The engine itself never reads config files for secrets; chat backends and the
//! `env(name)` expression capability resolve through `std::env`. This crate is the
//! one place that seeds that environment at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error loading environment sources.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("read config.toml: {0}")]
    TomlRead(std::io::Error),
    #[error("parse config.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// `[env]` table of `~/.config/trellis/config.toml`.
#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Loads `.env` (from `project_dir` or the current directory) and the XDG
/// `config.toml` `[env]` table, then sets each key that is **not** already
/// present in the process environment. Existing env always wins; `.env` wins
/// over the XDG file.
pub fn load_and_apply(app_name: &str, project_dir: Option<&Path>) -> Result<(), LoadError> {
    let dotenv_map = read_dotenv(project_dir).map_err(LoadError::DotenvRead)?;
    let xdg_map = read_xdg_env(app_name)?;

    let mut keys: Vec<String> = dotenv_map.keys().chain(xdg_map.keys()).cloned().collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        if let Some(v) = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)) {
            std::env::set_var(&key, v);
        }
    }
    Ok(())
}

/// Whether debug responses (error `stack` field) are enabled: `TRELLIS_DEBUG`
/// set to anything but `0`, `false`, or empty.
pub fn debug_enabled() -> bool {
    match std::env::var("TRELLIS_DEBUG") {
        Ok(v) => !matches!(v.as_str(), "" | "0" | "false"),
        Err(_) => false,
    }
}

/// Root directory for named Python virtual environments: `TRELLIS_VENV_DIR`
/// or `./venvs` relative to the working directory.
pub fn venv_dir() -> PathBuf {
    std::env::var("TRELLIS_VENV_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("venvs"))
}

fn read_dotenv(project_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let dir = match project_dir {
        Some(d) => d.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(d) => d,
            Err(_) => return Ok(HashMap::new()),
        },
    };
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    Ok(parse_dotenv(&std::fs::read_to_string(path)?))
}

/// Minimal `.env` grammar: `KEY=VALUE` lines, `#` comment lines, optional
/// single or double quotes around the value (`\"` escape inside double quotes).
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            inner.replace("\\\"", "\"")
        } else if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
            inner.to_string()
        } else {
            value.to_string()
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Reads `$XDG_CONFIG_HOME/<app>/config.toml` (or `~/.config/<app>/config.toml`)
/// and returns its `[env]` table. A missing file is an empty map, not an error.
fn read_xdg_env(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let config_home = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".config"))
                .ok()
        });
    let Some(config_home) = config_home else {
        return Ok(HashMap::new());
    };
    let path = config_home.join(app_name).join("config.toml");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::TomlRead)?;
    let file: ConfigFile = toml::from_str(&content)?;
    Ok(file.env)
}
