use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REGSTAT_DIR_NAME: &str = ".regstat";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_DATABASE_FILE: &str = "regstat.sqlite";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PROFILE_KEY: &str = "default";
pub const DEFAULT_REFERENCE_LOAD: f64 = 1_000.0;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegstatConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file, relative to the `.regstat` directory unless absolute.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Divisor applied to the load attribute before it is raised to the
    /// fourth power by the physical index.
    #[serde(default = "default_reference_load")]
    pub reference_load: f64,
    #[serde(default = "default_profile_key")]
    pub default_profile: String,
    #[serde(default = "default_weight_profiles")]
    pub weight_profiles: BTreeMap<String, WeightProfile>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reference_load: default_reference_load(),
            default_profile: default_profile_key(),
            weight_profiles: default_weight_profiles(),
        }
    }
}

/// Share of a vehicle's load carried by each axle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub axle_fractions: Vec<f64>,
}

impl WeightProfile {
    /// Sum of the fourth powers of the axle fractions.
    pub fn wear_factor(&self) -> f64 {
        self.axle_fractions
            .iter()
            .map(|fraction| fraction.powi(4))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Human,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("invalid weight profile '{profile}': {reason}")]
    InvalidWeightProfile { profile: String, reason: String },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

/// Validated lookup from vehicle category code to weight profile, with a
/// fallback profile for rows whose category is absent or unlisted.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightProfileTable {
    profiles: BTreeMap<String, WeightProfile>,
    default_key: String,
}

impl WeightProfileTable {
    pub fn from_config(metrics: &MetricsConfig) -> Result<Self, ConfigError> {
        let mut profiles = BTreeMap::new();
        for (key, profile) in &metrics.weight_profiles {
            validate_profile(key, profile)?;
            profiles.insert(profile_key(key), profile.clone());
        }

        let default_key = profile_key(&metrics.default_profile);
        if !profiles.contains_key(&default_key) {
            return Err(ConfigError::InvalidWeightProfile {
                profile: metrics.default_profile.clone(),
                reason: "default profile is not defined in [metrics.weight_profiles]".to_owned(),
            });
        }

        Ok(Self {
            profiles,
            default_key,
        })
    }

    pub fn profile_for(&self, category: Option<&str>) -> &WeightProfile {
        category
            .and_then(|code| self.profiles.get(&profile_key(code)))
            .unwrap_or_else(|| &self.profiles[&self.default_key])
    }

    pub fn default_profile(&self) -> &WeightProfile {
        &self.profiles[&self.default_key]
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

pub fn regstat_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(REGSTAT_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    regstat_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn database_path(workspace_root: impl AsRef<Path>, config: &RegstatConfig) -> PathBuf {
    let database = Path::new(&config.storage.database);
    if database.is_absolute() {
        database.to_path_buf()
    } else {
        regstat_dir(workspace_root).join(database)
    }
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<RegstatConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(RegstatConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    parse_config(&raw)
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<RegstatConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(regstat_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = RegstatConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Parses and validates a config document. Weight profiles and the reference
/// load are checked here so a bad profile fails at load time, not mid-query.
pub fn parse_config(raw: &str) -> Result<RegstatConfig, ConfigError> {
    let parsed: RegstatConfig = toml::from_str(raw)?;
    let config = normalize_config(parsed);

    if !(config.metrics.reference_load.is_finite() && config.metrics.reference_load > 0.0) {
        return Err(ConfigError::InvalidValue {
            field: "metrics.reference_load",
            reason: format!(
                "expected a positive number, got {}",
                config.metrics.reference_load
            ),
        });
    }
    WeightProfileTable::from_config(&config.metrics)?;

    Ok(config)
}

pub fn validate_config(config: &RegstatConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.storage.busy_timeout_ms == 0 {
        warnings.push(ConfigWarning {
            code: "storage_busy_timeout_zero",
            message: "storage.busy_timeout_ms is 0; concurrent readers may fail with SQLITE_BUSY"
                .to_owned(),
        });
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !matches!(
        level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        warnings.push(ConfigWarning {
            code: "logging_level_unrecognized",
            message: format!(
                "logging.level '{}' is not a plain level; it will be used as a filter directive",
                config.logging.level
            ),
        });
    }

    if config.metrics.weight_profiles.len() == 1 {
        warnings.push(ConfigWarning {
            code: "metrics_single_weight_profile",
            message: "only the default weight profile is configured; every vehicle category uses it"
                .to_owned(),
        });
    }

    warnings
}

fn validate_profile(key: &str, profile: &WeightProfile) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidWeightProfile {
        profile: key.to_owned(),
        reason,
    };

    if profile.axle_fractions.is_empty() {
        return Err(invalid("axle_fractions must not be empty".to_owned()));
    }
    if let Some(bad) = profile
        .axle_fractions
        .iter()
        .find(|fraction| !(fraction.is_finite() && **fraction > 0.0 && **fraction <= 1.0))
    {
        return Err(invalid(format!("axle fraction {bad} is outside (0, 1]")));
    }

    let sum: f64 = profile.axle_fractions.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(invalid(format!("axle fractions sum to {sum}, expected 1.0")));
    }

    Ok(())
}

fn profile_key(key: &str) -> String {
    key.trim().to_uppercase()
}

fn default_database() -> String {
    DEFAULT_DATABASE_FILE.to_owned()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_reference_load() -> f64 {
    DEFAULT_REFERENCE_LOAD
}

fn default_profile_key() -> String {
    DEFAULT_PROFILE_KEY.to_owned()
}

fn default_weight_profiles() -> BTreeMap<String, WeightProfile> {
    BTreeMap::from([(
        DEFAULT_PROFILE_KEY.to_owned(),
        WeightProfile {
            axle_fractions: vec![0.5, 0.5],
        },
    )])
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_owned()
}

fn normalize_config(mut config: RegstatConfig) -> RegstatConfig {
    let database = config.storage.database.trim();
    config.storage.database = if database.is_empty() {
        default_database()
    } else {
        database.to_owned()
    };

    let default_profile = config.metrics.default_profile.trim();
    config.metrics.default_profile = if default_profile.is_empty() {
        default_profile_key()
    } else {
        default_profile.to_owned()
    };

    let level = config.logging.level.trim();
    config.logging.level = if level.is_empty() {
        default_log_level()
    } else {
        level.to_owned()
    };

    config
}
