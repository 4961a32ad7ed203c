//! Configuration file support for corroflow
//!
//! Loads project-specific configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.corroflowrc.json` in the working directory
//! 3. `corroflow.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::window::{parse_period, FALLBACK_END, FALLBACK_START};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default inclusive ceiling on the starting corrosion rate (mpy)
pub const DEFAULT_RATE_CEILING: f64 = 20.0;

/// corroflow configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorroflowConfig {
    /// Path to the SQLite inspection database
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Starting-rate ceiling for top-level graphs (default: 20.0)
    #[serde(default)]
    pub rate_ceiling: Option<f64>,

    /// Use the id-filtered query for drill-down (default: true)
    #[serde(default)]
    pub narrow_query: Option<bool>,

    /// Window used when the database has no measurement dates
    #[serde(default)]
    pub fallback_window: Option<FallbackWindowConfig>,

    /// Circuit include/exclude patterns
    #[serde(default)]
    pub circuits: Option<CircuitConfig>,
}

/// Fallback window periods (YYYY-MM-DD)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackWindowConfig {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Glob patterns over circuit ids
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitConfig {
    /// Circuits to include (default: all)
    #[serde(default)]
    pub include: Vec<String>,
    /// Circuits to exclude
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Compiled circuit filter
#[derive(Debug, Clone)]
pub struct CircuitFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl CircuitFilter {
    /// Filter admitting every circuit
    pub fn allow_all() -> Self {
        CircuitFilter {
            include: None,
            exclude: None,
        }
    }

    pub fn is_restrictive(&self) -> bool {
        self.include.is_some() || self.exclude.is_some()
    }

    pub fn allows(&self, circuit_id: &str) -> bool {
        // Check exclude first
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(circuit_id) {
                return false;
            }
        }

        // If include patterns exist, circuit must match at least one
        if let Some(ref include) = self.include {
            return include.is_match(circuit_id);
        }

        true
    }
}

/// Resolved configuration with defaults applied and patterns compiled
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database: Option<PathBuf>,
    pub rate_ceiling: f64,
    pub narrow_query: bool,
    pub fallback_start: NaiveDate,
    pub fallback_end: NaiveDate,
    pub circuits: CircuitFilter,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

fn compile_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

impl CorroflowConfig {
    fn fallback_periods(&self) -> Result<(NaiveDate, NaiveDate)> {
        let (start, end) = match &self.fallback_window {
            Some(w) => (
                w.start.as_deref().unwrap_or(FALLBACK_START),
                w.end.as_deref().unwrap_or(FALLBACK_END),
            ),
            None => (FALLBACK_START, FALLBACK_END),
        };
        Ok((
            parse_period(start).context("fallback_window.start")?,
            parse_period(end).context("fallback_window.end")?,
        ))
    }

    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ceiling) = self.rate_ceiling {
            if !ceiling.is_finite() || ceiling < 0.0 {
                anyhow::bail!("rate_ceiling must be non-negative (got {})", ceiling);
            }
        }

        let (start, end) = self.fallback_periods()?;
        if start >= end {
            anyhow::bail!(
                "fallback_window.start ({}) must be before fallback_window.end ({})",
                start,
                end
            );
        }

        if let Some(ref circuits) = self.circuits {
            for pattern in &circuits.include {
                Glob::new(pattern)
                    .with_context(|| format!("invalid circuit include pattern: {}", pattern))?;
            }
            for pattern in &circuits.exclude {
                Glob::new(pattern)
                    .with_context(|| format!("invalid circuit exclude pattern: {}", pattern))?;
            }
        }

        Ok(())
    }

    /// Resolve config into compiled form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let (fallback_start, fallback_end) = self.fallback_periods()?;
        let circuits = match &self.circuits {
            Some(c) => CircuitFilter {
                include: compile_globs(&c.include)?,
                exclude: compile_globs(&c.exclude)?,
            },
            None => CircuitFilter::allow_all(),
        };

        Ok(ResolvedConfig {
            database: self.database.clone(),
            rate_ceiling: self.rate_ceiling.unwrap_or(DEFAULT_RATE_CEILING),
            narrow_query: self.narrow_query.unwrap_or(true),
            fallback_start,
            fallback_end,
            circuits,
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        CorroflowConfig::default().resolve()
    }
}

/// Discover and load a config file from a directory
///
/// Search order:
/// 1. `.corroflowrc.json`
/// 2. `corroflow.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(dir: &Path) -> Result<Option<(CorroflowConfig, PathBuf)>> {
    for name in [".corroflowrc.json", "corroflow.config.json"] {
        let path = dir.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<CorroflowConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: CorroflowConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `dir`.
/// Returns default config if nothing is found. A relative `database` path is
/// resolved against the directory of the config file it came from.
pub fn load_and_resolve(dir: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(dir)? {
            Some((config, path)) => (config, Some(path)),
            None => (CorroflowConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;

    // Relative database paths are relative to the config file
    if let (Some(db), Some(config_dir)) = (
        resolved.database.as_ref(),
        source_path.as_deref().and_then(Path::parent),
    ) {
        if db.is_relative() {
            resolved.database = Some(config_dir.join(db));
        }
    }

    resolved.config_path = source_path;
    Ok(resolved)
}
