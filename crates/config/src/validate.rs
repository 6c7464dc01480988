//! Configuration validation.
//!
//! Detects unknown or misspelled fields in the config file and checks the
//! effective configuration (file plus environment overrides) for values the
//! monitor cannot start with.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::{
    loader::{apply_env_overrides, find_config_file, parse_config_value},
    schema::{DEFAULT_PROCESSOR_ID, DirmonConfig, MIN_STABILITY_PERIOD_MS},
};

/// Processor ids the binary ships with.
pub const KNOWN_PROCESSORS: &[&str] = &[DEFAULT_PROCESSOR_ID, "Shell"];

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "required",
    /// "file-ref", "pattern", "defaulted", "processor"
    pub category: &'static str,
    /// Dotted path, e.g. "monitor.dir"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known keys per section. Top-level scalars map to an empty list.
const SCHEMA: &[(&str, &[&str])] = &[
    (
        "monitor",
        &["dir", "file_regex", "check_period_ms", "stability_period_ms"],
    ),
    ("processor", &["id", "command", "timeout_secs"]),
    ("reconcile", &["startup_delay_ms", "retry_interval_ms"]),
    ("store", &["database_url"]),
    ("shutdown_grace_ms", &[]),
];

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

fn unknown_field(path: String, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates, 3) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`. Environment overrides are applied
/// before the semantic checks.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(find_config_file);

    let Some(actual_path) = config_path else {
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        )];
        diagnostics.extend(check_config(&apply_env_overrides(DirmonConfig::default())));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => validate_str(&crate::env_subst::substitute_env(&raw), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate config text. `path` only selects the format by extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &mut diagnostics);

    // 3. Types, then semantics on the effective config
    match serde_json::from_value::<DirmonConfig>(value) {
        Ok(config) => diagnostics.extend(check_config(&apply_env_overrides(config))),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &serde_json::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(table) = value.as_object() else {
        return;
    };
    let sections: Vec<&str> = SCHEMA.iter().map(|(name, _)| *name).collect();

    for (key, child) in table {
        let Some((_, fields)) = SCHEMA.iter().find(|(name, _)| *name == key.as_str()) else {
            diagnostics.push(unknown_field(key.clone(), key, &sections));
            continue;
        };
        let Some(child) = child.as_object() else {
            continue;
        };
        for field in child.keys() {
            if !fields.contains(&field.as_str()) {
                diagnostics.push(unknown_field(format!("{key}.{field}"), field, fields));
            }
        }
    }
}

/// Semantic checks on a parsed configuration.
#[must_use]
pub fn check_config(config: &DirmonConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let monitor = &config.monitor;

    match &monitor.dir {
        None => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "required",
            "monitor.dir",
            "no directory to monitor is configured",
        )),
        Some(dir) if !dir.is_dir() => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "file-ref",
            "monitor.dir",
            format!("directory does not exist: {}", dir.display()),
        )),
        Some(_) => {},
    }

    if let Err(e) = Regex::new(monitor.file_regex()) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "pattern",
            "monitor.file_regex",
            format!("invalid regex: {e}"),
        ));
    }

    if let Some(ms) = monitor.check_period_ms
        && ms <= 0
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "defaulted",
            "monitor.check_period_ms",
            format!("{ms} is not positive; using {} ms", monitor.check_period().as_millis()),
        ));
    }

    if let Some(ms) = monitor.stability_period_ms
        && ms < MIN_STABILITY_PERIOD_MS
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "defaulted",
            "monitor.stability_period_ms",
            format!(
                "{ms} is below {MIN_STABILITY_PERIOD_MS}; using {} ms",
                monitor.stability_period().as_millis()
            ),
        ));
    }

    if config.reconcile.retry_interval_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "defaulted",
            "reconcile.retry_interval_ms",
            format!(
                "0 is not a valid interval; using {} ms",
                config.reconcile.retry_interval().as_millis()
            ),
        ));
    }

    let processor = &config.processor;
    if processor.id == "Shell" && processor.command.as_deref().is_none_or(str::is_empty) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "processor",
            "processor.command",
            "the Shell processor needs a command",
        ));
    } else if !KNOWN_PROCESSORS.contains(&processor.id.as_str()) {
        let message = match suggest(&processor.id, KNOWN_PROCESSORS, 3) {
            Some(s) => format!(
                "unknown processor (did you mean \"{s}\"?); falls back to {DEFAULT_PROCESSOR_ID}"
            ),
            None => format!("unknown processor; falls back to {DEFAULT_PROCESSOR_ID}"),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "processor",
            "processor.id",
            message,
        ));
    }

    diagnostics
}
