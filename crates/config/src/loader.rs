use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::DirmonConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["dirmon.toml", "dirmon.yaml", "dirmon.yml", "dirmon.json"];

/// Environment variables that override individual config values.
pub const ENV_DIR: &str = "DIRMON_DIR";
pub const ENV_FILE_REGEX: &str = "DIRMON_FILE_REGEX";
pub const ENV_PROCESSOR: &str = "DIRMON_PROCESSOR";
pub const ENV_DATABASE_URL: &str = "DIRMON_DATABASE_URL";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<DirmonConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load the config file as an untyped value, after env substitution.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config_value(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./dirmon.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/dirmon/dirmon.{toml,yaml,yml,json}` (user-global)
///
/// Returns `DirmonConfig::default()` if no config file is found.
pub fn discover_and_load() -> DirmonConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    DirmonConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/dirmon/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "dirmon").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding the default database, or `./.dirmon`
/// when no home directory can be determined.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "dirmon")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".dirmon"))
}

/// Apply `DIRMON_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: DirmonConfig) -> DirmonConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: DirmonConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> DirmonConfig {
    let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(dir) = lookup(ENV_DIR) {
        config.monitor.dir = Some(PathBuf::from(dir));
    }
    if let Some(regex) = lookup(ENV_FILE_REGEX) {
        config.monitor.file_regex = Some(regex);
    }
    if let Some(id) = lookup(ENV_PROCESSOR) {
        config.processor.id = id;
    }
    if let Some(url) = lookup(ENV_DATABASE_URL) {
        config.store.database_url = Some(url);
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<DirmonConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
