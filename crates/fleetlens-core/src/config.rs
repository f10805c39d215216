//! Configuration loading and merging for fleetlens.
//!
//! Configuration is resolved with project > home > defaults precedence and is
//! loaded from `.fleetlens.yaml` files. Layers are merged key by key and every
//! section carries `#[serde(default)]`, so a partial file only overrides what
//! it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yml::{Mapping, Value};
use tracing::{debug, info};

use crate::CoreError;

/// File name looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".fleetlens.yaml";

/// Storage location used when `cache.path` is not configured.
pub const DEFAULT_CACHE_PATH: &str = "./data/fleetlens_cache.sqlite3";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Top-level fleetlens configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetlensConfig {
    /// Result-cache storage settings.
    pub cache: CacheConfig,
    /// Retention policy applied by cache maintenance.
    pub cleanup: CleanupConfig,
    /// How query results are handed to the assistant host.
    pub handoff: HandoffConfig,
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Result-cache storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Path to the embedded database file. `None` means [`DEFAULT_CACHE_PATH`].
    pub path: Option<String>,
    /// Maximum cache size in MiB.
    pub max_size_mb: u64,
    /// Row cap applied to ad-hoc queries when the caller does not pass one.
    pub default_query_limit: usize,
}

impl CacheConfig {
    /// Returns the configured storage path, or the default one.
    #[must_use]
    pub fn storage_path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_CACHE_PATH)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size_mb: 500,
            default_query_limit: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// CleanupConfig
// ---------------------------------------------------------------------------

/// Retention policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Tables not accessed for this many days are evicted.
    pub max_age_days: u32,
    /// Exempt frequently used tables from eviction.
    pub keep_frequently_used: bool,
    /// Access count at which a table counts as frequently used.
    pub min_access_count: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_days: 14,
            keep_frequently_used: true,
            min_access_count: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// HandoffConfig
// ---------------------------------------------------------------------------

/// Settings for handing query results to the assistant host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Results with more rows than this are cached instead of inlined.
    pub large_result_threshold: usize,
    /// Rows shown as a sample when a result is cached.
    pub sample_rows: usize,
    /// Rows shown when a small result is rendered inline.
    pub inline_preview_rows: usize,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            large_result_threshold: 200,
            sample_rows: 20,
            inline_preview_rows: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and merge configuration from multiple sources.
///
/// Resolution order (highest priority first):
/// 1. `.fleetlens.yaml` in the project directory
/// 2. `.fleetlens.yaml` in the user home directory
/// 3. Built-in defaults
///
/// Files are merged key by key, so a project file that only sets
/// `handoff.large_result_threshold` keeps every other value from home.
///
/// # Errors
///
/// Returns [`CoreError::Config`] if a config file exists but is malformed.
pub fn load_config(project_dir: Option<&Path>) -> Result<FleetlensConfig, CoreError> {
    let mut files = Vec::new();
    if let Some(home) = home_dir() {
        files.push(home.join(CONFIG_FILE_NAME));
    }
    if let Some(dir) = project_dir {
        files.push(dir.join(CONFIG_FILE_NAME));
    }

    let config = load_layered(&files)?;
    info!(
        cache_path = config.cache.storage_path(),
        max_size_mb = config.cache.max_size_mb,
        "configuration loaded"
    );
    Ok(config)
}

/// Merge the config files in `files`, later files taking priority. Missing
/// files are skipped.
fn load_layered(files: &[PathBuf]) -> Result<FleetlensConfig, CoreError> {
    let mut merged = Value::Mapping(Mapping::new());
    for path in files.iter().filter(|p| p.is_file()) {
        debug!(path = %path.display(), "loading config layer");
        merge_values(&mut merged, read_layer(path)?);
    }

    serde_yml::from_value(merged)
        .map_err(|e| CoreError::Config(format!("failed to apply merged config: {e}")))
}

/// Load a single config file and deserialize it.
pub fn load_config_file(path: &Path) -> Result<FleetlensConfig, CoreError> {
    serde_yml::from_value(read_layer(path)?).map_err(|e| {
        CoreError::Config(format!(
            "failed to parse config file '{}': {e}",
            path.display()
        ))
    })
}

/// Read a config file as an untyped YAML tree.
fn read_layer(path: &Path) -> Result<Value, CoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!(
            "failed to read config file '{}': {e}",
            path.display()
        ))
    })?;

    serde_yml::from_str(&content).map_err(|e| {
        CoreError::Config(format!(
            "failed to parse config file '{}': {e}",
            path.display()
        ))
    })
}

/// Merge `overlay` into `base`. Mappings merge recursively; any other
/// overlay value replaces the base value. A null overlay (empty file or
/// bare key) changes nothing.
fn merge_values(base: &mut Value, overlay: Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Get the user home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config() {
        let config = FleetlensConfig::default();
        assert_eq!(config.cache.path, None);
        assert_eq!(config.cache.storage_path(), DEFAULT_CACHE_PATH);
        assert_eq!(config.cache.max_size_mb, 500);
        assert_eq!(config.cache.default_query_limit, 1000);
        assert_eq!(config.cleanup.max_age_days, 14);
        assert!(config.cleanup.keep_frequently_used);
        assert_eq!(config.cleanup.min_access_count, 5);
        assert_eq!(config.handoff.large_result_threshold, 200);
        assert_eq!(config.handoff.sample_rows, 20);
        assert_eq!(config.handoff.inline_preview_rows, 100);
    }

    #[test]
    fn load_config_file_full_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = r#"
cache:
  path: ./cache/results.sqlite3
  max_size_mb: 200
  default_query_limit: 250
cleanup:
  max_age_days: 7
  keep_frequently_used: false
  min_access_count: 3
handoff:
  large_result_threshold: 20
  sample_rows: 5
  inline_preview_rows: 50
"#;
        let config_path = tmp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, yaml).unwrap();

        let config = load_config_file(&config_path).unwrap();

        assert_eq!(config.cache.storage_path(), "./cache/results.sqlite3");
        assert_eq!(config.cache.max_size_mb, 200);
        assert_eq!(config.cache.default_query_limit, 250);
        assert_eq!(config.cleanup.max_age_days, 7);
        assert!(!config.cleanup.keep_frequently_used);
        assert_eq!(config.cleanup.min_access_count, 3);
        assert_eq!(config.handoff.large_result_threshold, 20);
        assert_eq!(config.handoff.sample_rows, 5);
        assert_eq!(config.handoff.inline_preview_rows, 50);
    }

    #[test]
    fn project_config_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "handoff:\n  large_result_threshold: 42\n",
        )
        .unwrap();

        let config = load_config(Some(tmp.path())).unwrap();
        assert_eq!(config.handoff.large_result_threshold, 42);
    }

    #[test]
    fn load_config_malformed_yaml_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "invalid: [yaml: {broken").unwrap();
        let result = load_config(Some(tmp.path()));
        assert!(result.is_err());
        if let Err(CoreError::Config(msg)) = result {
            assert!(msg.contains("failed to parse"));
        }
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "cache:\n  max_size_mb: 64\n").unwrap();

        let config = load_config_file(&path).unwrap();

        assert_eq!(config.cache.max_size_mb, 64);
        assert_eq!(config.cache.default_query_limit, 1000);
        assert_eq!(config.cleanup, CleanupConfig::default());
        assert_eq!(config.handoff, HandoffConfig::default());
    }

    fn write_layer(dir: &Path, name: &str, yaml: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn project_layer_keeps_home_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let home = write_layer(
            tmp.path(),
            "home.yaml",
            "cleanup:\n  max_age_days: 7\ncache:\n  max_size_mb: 64\n",
        );
        let project = write_layer(
            tmp.path(),
            "project.yaml",
            "handoff:\n  large_result_threshold: 42\n",
        );

        let config = load_layered(&[home, project]).unwrap();

        assert_eq!(config.cleanup.max_age_days, 7);
        assert!(config.cleanup.keep_frequently_used);
        assert_eq!(config.cache.max_size_mb, 64);
        assert_eq!(config.handoff.large_result_threshold, 42);
        assert_eq!(config.handoff.sample_rows, 20);
    }

    #[test]
    fn project_layer_overrides_single_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let home = write_layer(
            tmp.path(),
            "home.yaml",
            "cache:\n  path: /home/user/.fleetlens/cache.sqlite3\n  max_size_mb: 64\n",
        );
        let project = write_layer(tmp.path(), "project.yaml", "cache:\n  max_size_mb: 100\n");

        let config = load_layered(&[home, project]).unwrap();

        assert_eq!(
            config.cache.path.as_deref(),
            Some("/home/user/.fleetlens/cache.sqlite3")
        );
        assert_eq!(config.cache.max_size_mb, 100);
        assert_eq!(config.cache.default_query_limit, 1000);
    }

    #[test]
    fn project_path_wins_and_missing_layers_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let home = write_layer(
            tmp.path(),
            "home.yaml",
            "cache:\n  path: /home/user/.fleetlens/cache.sqlite3\n",
        );
        let empty = write_layer(tmp.path(), "empty.yaml", "");
        let project = write_layer(tmp.path(), "project.yaml", "cache:\n  path: ./project.sqlite3\n");

        let config =
            load_layered(&[home, tmp.path().join("absent.yaml"), empty, project]).unwrap();

        assert_eq!(config.cache.path.as_deref(), Some("./project.sqlite3"));
    }

    #[test]
    fn ill_typed_layer_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = write_layer(tmp.path(), "bad.yaml", "cleanup:\n  max_age_days: soon\n");
        assert!(matches!(load_layered(&[bad]), Err(CoreError::Config(_))));
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = FleetlensConfig::default();
        let yaml = serde_yml::to_string(&config).unwrap();
        let back: FleetlensConfig = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
