//! Configuration module for Nimbus.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{HashAlgorithm, SyncPair};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Nimbus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    pub drive: DriveConfig,
    /// Managed (local directory, remote folder) pairs.
    pub pairs: Vec<SyncPair>,
}

/// Synchronization settings shared by every pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds to sleep between two cycles of the same pair.
    pub interval_secs: u64,
    /// Directory holding the persisted trees and hash caches.
    pub state_root: PathBuf,
    /// Maximum number of tasks executed concurrently within one depth level.
    pub max_concurrent_tasks: usize,
    /// Number of entries stat'ed concurrently during a local walk.
    pub stat_batch_size: usize,
    /// Name of the trash directory created inside each local root.
    pub local_trash_dir: String,
    /// Digest used for local content hashes.
    pub hash_algorithm: HashAlgorithm,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

/// Directory-backed drive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Directory holding the drive catalog and content objects.
    pub root: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/nimbus/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("nimbus")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("nimbus")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            state_root: data_dir().join("state"),
            max_concurrent_tasks: 10,
            stat_batch_size: 64,
            local_trash_dir: ".nimbus-trash".to_string(),
            hash_algorithm: HashAlgorithm::Sha512,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("drive"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_concurrent_tasks == 0 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_tasks".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.stat_batch_size == 0 {
            errors.push(ValidationError {
                field: "sync.stat_batch_size".into(),
                message: "must be greater than 0".into(),
            });
        }
        let trash = self.sync.local_trash_dir.as_str();
        if trash.is_empty() || trash == "." || trash == ".." || trash.contains('/') {
            errors.push(ValidationError {
                field: "sync.local_trash_dir".into(),
                message: format!("must be a single directory name, got '{trash}'"),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- pairs ---
        let mut seen = HashSet::new();
        for (idx, pair) in self.pairs.iter().enumerate() {
            if !seen.insert(pair.uuid) {
                errors.push(ValidationError {
                    field: format!("pairs[{idx}].uuid"),
                    message: format!("duplicate pair uuid {}", pair.uuid),
                });
            }
            if !pair.local_path.is_absolute() {
                errors.push(ValidationError {
                    field: format!("pairs[{idx}].local_path"),
                    message: format!("must be absolute: {}", pair.local_path.display()),
                });
            }
            for (other_idx, other) in self.pairs.iter().enumerate() {
                if other_idx != idx && pair.local_path.starts_with(&other.local_path) {
                    errors.push(ValidationError {
                        field: format!("pairs[{idx}].local_path"),
                        message: format!(
                            "{} is nested in pairs[{other_idx}] ({})",
                            pair.local_path.display(),
                            other.local_path.display()
                        ),
                    });
                }
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use nimbus_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_interval_secs(10)
///     .sync_state_root(PathBuf::from("/var/lib/nimbus"))
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.interval_secs = seconds;
        self
    }

    pub fn sync_state_root(mut self, root: PathBuf) -> Self {
        self.config.sync.state_root = root;
        self
    }

    pub fn sync_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_tasks = n;
        self
    }

    pub fn sync_stat_batch_size(mut self, n: usize) -> Self {
        self.config.sync.stat_batch_size = n;
        self
    }

    pub fn sync_local_trash_dir(mut self, name: impl Into<String>) -> Self {
        self.config.sync.local_trash_dir = name.into();
        self
    }

    pub fn sync_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.sync.hash_algorithm = algorithm;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- drive ---

    pub fn drive_root(mut self, root: PathBuf) -> Self {
        self.config.drive.root = root;
        self
    }

    // --- pairs ---

    pub fn pair(mut self, pair: SyncPair) -> Self {
        self.config.pairs.push(pair);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use uuid::Uuid;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.interval_secs, 5);
        assert_eq!(cfg.sync.max_concurrent_tasks, 10);
        assert_eq!(cfg.sync.stat_batch_size, 64);
        assert_eq!(cfg.sync.local_trash_dir, ".nimbus-trash");
        assert_eq!(cfg.sync.hash_algorithm, HashAlgorithm::Sha512);
        assert!(cfg.sync.state_root.ends_with("nimbus/state"));
        assert!(cfg.drive.root.ends_with("nimbus/drive"));
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert!(cfg.pairs.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  interval_secs: 30
  state_root: /tmp/nimbus-state
  max_concurrent_tasks: 4
  stat_batch_size: 16
  local_trash_dir: .trash
  hash_algorithm: sha256
logging:
  level: debug
  json: true
drive:
  root: /tmp/nimbus-drive
pairs:
  - uuid: 6f1c1d7e-3f0a-4a55-9f57-0c3b0f1e2a10
    local_path: /home/user/Sync
    remote_parent_uuid: 9a0e4f6b-7d1c-4f3e-8a2b-5c6d7e8f9012
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.interval_secs, 30);
        assert_eq!(cfg.sync.state_root, PathBuf::from("/tmp/nimbus-state"));
        assert_eq!(cfg.sync.max_concurrent_tasks, 4);
        assert_eq!(cfg.sync.stat_batch_size, 16);
        assert_eq!(cfg.sync.local_trash_dir, ".trash");
        assert_eq!(cfg.sync.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.drive.root, PathBuf::from("/tmp/nimbus-drive"));
        assert_eq!(cfg.pairs.len(), 1);
        assert_eq!(cfg.pairs[0].local_path, PathBuf::from("/home/user/Sync"));
        assert_eq!(
            cfg.pairs[0].remote_parent_uuid,
            Uuid::parse_str("9a0e4f6b-7d1c-4f3e-8a2b-5c6d7e8f9012").unwrap()
        );
    }

    #[test]
    fn load_fills_missing_sections_with_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"sync:\n  interval_secs: 9\n").unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.interval_secs, 9);
        assert_eq!(cfg.sync.max_concurrent_tasks, 10);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.pairs.is_empty());
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.interval_secs, 5);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    #[test]
    fn default_path_ends_with_nimbus_config() {
        assert!(Config::default_path().ends_with("nimbus/config.yaml"));
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_sync_values() {
        let mut cfg = Config::default();
        cfg.sync.interval_secs = 0;
        cfg.sync.max_concurrent_tasks = 0;
        cfg.sync.stat_batch_size = 0;
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"sync.interval_secs"));
        assert!(fields.contains(&"sync.max_concurrent_tasks"));
        assert!(fields.contains(&"sync.stat_batch_size"));
    }

    #[test]
    fn validate_catches_bad_trash_dir_names() {
        for name in ["", "a/b", ".."] {
            let mut cfg = Config::default();
            cfg.sync.local_trash_dir = name.to_string();
            let errors = cfg.validate();
            assert!(
                errors.iter().any(|e| e.field == "sync.local_trash_dir"),
                "trash dir '{name}' should be rejected"
            );
        }
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let mut cfg = Config::default();
        cfg.logging.level = "verbose".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_accepts_all_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let mut cfg = Config::default();
            cfg.logging.level = level.to_string();
            let errors = cfg.validate();
            assert!(
                !errors.iter().any(|e| e.field == "logging.level"),
                "level '{level}' should be valid"
            );
        }
    }

    #[test]
    fn validate_catches_duplicate_pair_uuids() {
        let first = SyncPair::new("/sync/a", Uuid::new_v4());
        let mut second = SyncPair::new("/sync/b", Uuid::new_v4());
        second.uuid = first.uuid;
        let cfg = ConfigBuilder::new().pair(first).pair(second).build();

        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "pairs[1].uuid"));
    }

    #[test]
    fn validate_catches_nested_pairs() {
        let cfg = ConfigBuilder::new()
            .pair(SyncPair::new("/sync", Uuid::new_v4()))
            .pair(SyncPair::new("/sync/inner", Uuid::new_v4()))
            .pair(SyncPair::new("/sync-other", Uuid::new_v4()))
            .build();

        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["pairs[1].local_path"]);
    }

    #[test]
    fn validate_catches_relative_local_path() {
        let cfg = ConfigBuilder::new()
            .pair(SyncPair::new("relative/dir", Uuid::new_v4()))
            .build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "pairs[0].local_path"));
    }

    // -- Builder --

    #[test]
    fn builder_starts_from_defaults() {
        let cfg = ConfigBuilder::new().build();
        assert_eq!(cfg.sync.interval_secs, 5);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .sync_interval_secs(60)
            .sync_state_root(PathBuf::from("/custom/state"))
            .sync_max_concurrent_tasks(2)
            .sync_stat_batch_size(8)
            .sync_local_trash_dir(".bin")
            .sync_hash_algorithm(HashAlgorithm::Sha256)
            .logging_level("trace")
            .logging_json(true)
            .drive_root(PathBuf::from("/custom/drive"))
            .build();

        assert_eq!(cfg.sync.interval_secs, 60);
        assert_eq!(cfg.sync.state_root, PathBuf::from("/custom/state"));
        assert_eq!(cfg.sync.max_concurrent_tasks, 2);
        assert_eq!(cfg.sync.stat_batch_size, 8);
        assert_eq!(cfg.sync.local_trash_dir, ".bin");
        assert_eq!(cfg.sync.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(cfg.logging.level, "trace");
        assert!(cfg.logging.json);
        assert_eq!(cfg.drive.root, PathBuf::from("/custom/drive"));
    }

    #[test]
    fn build_validated_rejects_invalid_config() {
        let result = ConfigBuilder::new().sync_interval_secs(0).build_validated();
        let errors = result.unwrap_err();
        assert_eq!(errors[0].field, "sync.interval_secs");
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "sync.interval_secs".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "sync.interval_secs: must be greater than 0");
    }
}
