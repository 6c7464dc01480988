//! Configuration loading, validation and env substitution.
//!
//! Config files: `dirmon.toml`, `dirmon.yaml`, `dirmon.yml` or `dirmon.json`
//! Searched in `./` then `~/.config/dirmon/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and `DIRMON_*`
//! overrides for the most common settings.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, data_dir, discover_and_load, load_config},
    schema::{DirmonConfig, MonitorConfig, ProcessorConfig, ReconcileConfig, StoreConfig},
    validate::{Diagnostic, Severity, ValidationResult, check_config, validate},
};
