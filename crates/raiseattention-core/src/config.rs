//! Layered configuration loading.
//!
//! Configuration is a right-biased overlay of partial layers:
//!
//! 1. built-in defaults
//! 2. `pyproject.toml`, tables `[tool.raiseattention]` and
//!    `[tool.raiseattention.analysis]`
//! 3. `.raiseattention.toml` at the project root
//! 4. `RAISEATTENTION_*` environment variables
//! 5. CLI flags (applied by the frontend on top of the loaded value)
//!
//! Each layer is deserialized into [`ConfigLayer`], a struct of optional
//! fields; [`Config::load`] folds the layers into the effective value.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Configuration file is not valid TOML.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

// ============================================================================
// Effective Configuration
// ============================================================================

/// Cache tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether the on-disk cache is used at all.
    pub enabled: bool,
    /// Maximum number of file-tier entries before LRU eviction.
    pub max_file_entries: usize,
    /// Time-to-live for unused entries, in hours.
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_entries: 10_000,
            ttl_hours: 24,
        }
    }
}

/// Analysis behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Skip external-module analysis entirely.
    pub local_only: bool,
    /// Warn about possible exceptions from native callees.
    pub warn_native: bool,
    /// Flag exceptions missing from the raising function's docstring.
    pub strict_mode: bool,
    /// Emit qualified exception names instead of short names.
    pub full_module_path: bool,
    /// Built-in names whose diagnostics are always suppressed.
    pub ignore_include: Vec<String>,
    /// Built-in names never suppressed (wins over `ignore_include`).
    pub ignore_exclude: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            local_only: false,
            warn_native: true,
            strict_mode: false,
            full_module_path: false,
            ignore_include: Vec::new(),
            ignore_exclude: Vec::new(),
        }
    }
}

/// Effective configuration for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Project root the configuration was loaded for.
    pub project_root: PathBuf,
    /// Glob patterns for files to exclude from discovery.
    pub exclude: Vec<String>,
    /// Exception class names ignored everywhere.
    pub ignore_exceptions: Vec<String>,
    /// Module glob patterns whose external analysis is skipped.
    pub ignore_modules: Vec<String>,
    /// Target Python version for stub resolution, `"major.minor"` form.
    pub python_version: String,
    /// Explicit standard-library directory, if configured.
    pub stdlib_path: Option<PathBuf>,
    /// Explicit virtual-environment directory, if configured.
    pub venv_path: Option<PathBuf>,
    /// LSP debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Cache knobs.
    pub cache: CacheConfig,
    /// Analysis knobs.
    pub analysis: AnalysisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            exclude: vec![
                "**/tests/**".to_string(),
                "**/migrations/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/.venv/**".to_string(),
                "**/.git/**".to_string(),
            ],
            ignore_exceptions: vec!["KeyboardInterrupt".to_string(), "SystemExit".to_string()],
            ignore_modules: Vec::new(),
            python_version: "3.12".to_string(),
            stdlib_path: None,
            venv_path: None,
            debounce_ms: 500,
            cache: CacheConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

// ============================================================================
// Partial Layers
// ============================================================================

/// One partial configuration layer; every field optional. Unknown
/// keys are ignored so configs shared with other tools still load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
    pub exclude: Option<Vec<String>>,
    pub ignore_exceptions: Option<Vec<String>>,
    pub ignore_modules: Option<Vec<String>>,
    pub python_version: Option<String>,
    pub stdlib_path: Option<PathBuf>,
    pub venv_path: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub cache: CacheLayer,
    #[serde(default)]
    pub analysis: AnalysisLayer,
    // Accepted at the top level too, mirroring the analysis table.
    pub local_only: Option<bool>,
    pub warn_native: Option<bool>,
    pub strict_mode: Option<bool>,
    pub full_module_path: Option<bool>,
    pub ignore_include: Option<Vec<String>>,
    pub ignore_exclude: Option<Vec<String>>,
}

/// Partial cache table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheLayer {
    pub enabled: Option<bool>,
    pub max_file_entries: Option<usize>,
    pub ttl_hours: Option<u64>,
}

/// Partial analysis table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisLayer {
    pub local_only: Option<bool>,
    pub warn_native: Option<bool>,
    pub strict_mode: Option<bool>,
    pub full_module_path: Option<bool>,
    pub ignore_include: Option<Vec<String>>,
    pub ignore_exclude: Option<Vec<String>>,
}

impl Config {
    /// Load the effective configuration for a project root.
    ///
    /// Missing files are fine; unreadable or unparsable files are
    /// reported as errors so a typo in a config table never silently
    /// reverts to defaults.
    pub fn load(project_root: &Path) -> ConfigResult<Config> {
        let mut config = Config {
            project_root: project_root.to_path_buf(),
            ..Config::default()
        };

        if let Some(layer) = load_pyproject_layer(project_root)? {
            debug!("applying pyproject.toml configuration layer");
            config.apply(&layer);
        }

        let dotfile = project_root.join(".raiseattention.toml");
        if dotfile.exists() {
            let layer = load_layer_file(&dotfile)?;
            debug!("applying .raiseattention.toml configuration layer");
            config.apply(&layer);
        }

        config.apply(&layer_from_env());
        Ok(config)
    }

    /// Overlay one partial layer onto this configuration.
    pub fn apply(&mut self, layer: &ConfigLayer) {
        if let Some(v) = &layer.exclude {
            self.exclude = v.clone();
        }
        if let Some(v) = &layer.ignore_exceptions {
            self.ignore_exceptions = v.clone();
        }
        if let Some(v) = &layer.ignore_modules {
            self.ignore_modules = v.clone();
        }
        if let Some(v) = &layer.python_version {
            self.python_version = v.clone();
        }
        if let Some(v) = &layer.stdlib_path {
            self.stdlib_path = Some(v.clone());
        }
        if let Some(v) = &layer.venv_path {
            self.venv_path = Some(v.clone());
        }
        if let Some(v) = layer.debounce_ms {
            self.debounce_ms = v;
        }

        if let Some(v) = layer.cache.enabled {
            self.cache.enabled = v;
        }
        if let Some(v) = layer.cache.max_file_entries {
            self.cache.max_file_entries = v;
        }
        if let Some(v) = layer.cache.ttl_hours {
            self.cache.ttl_hours = v;
        }

        let analysis = &mut self.analysis;
        for (slot, value) in [
            (&mut analysis.local_only, layer.analysis.local_only.or(layer.local_only)),
            (&mut analysis.warn_native, layer.analysis.warn_native.or(layer.warn_native)),
            (&mut analysis.strict_mode, layer.analysis.strict_mode.or(layer.strict_mode)),
            (
                &mut analysis.full_module_path,
                layer.analysis.full_module_path.or(layer.full_module_path),
            ),
        ] {
            if let Some(v) = value {
                *slot = v;
            }
        }
        if let Some(v) = layer.analysis.ignore_include.as_ref().or(layer.ignore_include.as_ref()) {
            analysis.ignore_include = v.clone();
        }
        if let Some(v) = layer.analysis.ignore_exclude.as_ref().or(layer.ignore_exclude.as_ref()) {
            analysis.ignore_exclude = v.clone();
        }
    }
}

/// Load the `[tool.raiseattention]` table from `pyproject.toml`, if any.
fn load_pyproject_layer(project_root: &Path) -> ConfigResult<Option<ConfigLayer>> {
    let path = project_root.join("pyproject.toml");
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let Some(table) = value
        .get("tool")
        .and_then(|t| t.get("raiseattention"))
        .cloned()
    else {
        return Ok(None);
    };

    let layer: ConfigLayer = table.try_into().map_err(|e| ConfigError::Parse {
        path,
        message: e.to_string(),
    })?;
    Ok(Some(layer))
}

/// Load a whole-file layer (`.raiseattention.toml`).
fn load_layer_file(path: &Path) -> ConfigResult<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Build a layer from `RAISEATTENTION_*` environment variables.
fn layer_from_env() -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    if let Ok(v) = std::env::var("RAISEATTENTION_STRICT_MODE") {
        layer.strict_mode = Some(parse_env_bool(&v));
    }
    if let Ok(v) = std::env::var("RAISEATTENTION_VENV_PATH") {
        layer.venv_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("RAISEATTENTION_DEBOUNCE_MS") {
        if let Ok(ms) = v.parse::<u64>() {
            layer.debounce_ms = Some(ms);
        }
    }
    layer
}

fn parse_env_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert!(config.analysis.warn_native);
        assert!(!config.analysis.strict_mode);
        assert_eq!(config.debounce_ms, 500);
        assert!(config
            .ignore_exceptions
            .contains(&"KeyboardInterrupt".to_string()));
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn pyproject_layer_is_applied() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            r#"
[tool.raiseattention]
ignore_exceptions = ["KeyError"]

[tool.raiseattention.analysis]
strict_mode = true
warn_native = false
"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.ignore_exceptions, vec!["KeyError".to_string()]);
        assert!(config.analysis.strict_mode);
        assert!(!config.analysis.warn_native);
    }

    #[test]
    fn dotfile_overrides_pyproject() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.raiseattention.analysis]\nstrict_mode = true\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(".raiseattention.toml"),
            "[analysis]\nstrict_mode = false\nlocal_only = true\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert!(!config.analysis.strict_mode);
        assert!(config.analysis.local_only);
    }

    #[test]
    fn cache_knobs_overlay() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".raiseattention.toml"),
            "[cache]\nenabled = false\nmax_file_entries = 64\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_file_entries, 64);
        assert_eq!(config.cache.ttl_hours, 24);
    }

    #[test]
    fn parse_error_is_reported_not_swallowed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".raiseattention.toml"), "not = [valid").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn top_level_analysis_keys_are_accepted() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".raiseattention.toml"),
            "local_only = true\nignore_include = [\"open\"]\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert!(config.analysis.local_only);
        assert_eq!(config.analysis.ignore_include, vec!["open".to_string()]);
    }
}
