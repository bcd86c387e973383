//! Configuration loading and root folder resolution
//!
//! Priority order for both the config file and the root folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable config file is never fatal: a warning is logged
//! and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "HWX_CONFIG";

/// Environment variable naming the root folder (database, cache)
pub const ROOT_FOLDER_ENV_VAR: &str = "HWX_ROOT_FOLDER";

/// User agent sent by the lightweight fetcher
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the catalog database and cache
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub browser: BrowserConfig,
    pub cache: CacheConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub level: String,
    /// Emit ANSI colors
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "hwx_engine=info,hwx_common=info".to_string(),
            ansi: true,
        }
    }
}

/// How many sources a chain walk queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainMode {
    /// Stop at the first source that yields fields (interactive use)
    #[default]
    FirstSuccess,
    /// Query every eligible source and cross-validate (offline enrichment)
    Exhaustive,
}

impl std::str::FromStr for ChainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-success" | "first_success" => Ok(Self::FirstSuccess),
            "exhaustive" => Ok(Self::Exhaustive),
            other => Err(Error::UnknownValue {
                kind: "chain mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Options recognized by the resolution and retrieval core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allow reference-tier (secondary) sources in source chains
    pub enable_secondary_tier: bool,
    /// Timeout for a single fetch attempt, in milliseconds
    pub fetch_timeout_ms: u64,
    /// Retries after a transport error, per source
    pub max_retries_per_source: u32,
    /// Relative numeric tolerance per spec key; unlisted keys compare exactly
    pub consensus_tolerance_by_key: BTreeMap<String, f64>,
    /// Minimum seconds between requests to a domain (and its subdomains)
    pub domain_throttle_seconds: BTreeMap<String, f64>,
    /// Default chain mode for lookups
    pub chain_mode: ChainMode,
    /// User agent for the lightweight fetcher
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_secondary_tier: true,
            fetch_timeout_ms: 15_000,
            max_retries_per_source: 2,
            consensus_tolerance_by_key: default_consensus_tolerances(),
            domain_throttle_seconds: BTreeMap::new(),
            chain_mode: ChainMode::FirstSuccess,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Magnitude keys compared numerically; everything else compares exactly
fn default_consensus_tolerances() -> BTreeMap<String, f64> {
    [
        ("ram.voltage_v", 0.05),
        ("ram.speed_mhz", 0.05),
        ("cpu.base_clock_mhz", 0.05),
        ("cpu.boost_clock_mhz", 0.05),
        ("cpu.tdp_w", 0.10),
        ("gpu.boost_clock_mhz", 0.05),
        ("gpu.tdp_w", 0.10),
        ("disk.read_speed_mb", 0.10),
        ("disk.write_speed_mb", 0.10),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Heavyweight (browser) fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// WebDriver endpoint (chromedriver, geckodriver)
    pub webdriver_url: String,
    /// Maximum concurrently open browser sessions
    pub max_sessions: usize,
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            max_sessions: 2,
            headless: true,
        }
    }
}

/// Fingerprint cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 7 * 24 * 3600,
        }
    }
}

/// Resolve the config file path: CLI argument, then environment, then platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    dirs::config_dir().map(|d| d.join("hwx").join("config.toml"))
}

/// Load configuration, degrading to defaults when the file is missing or invalid
pub fn load_config(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        warn!("No config path available, using defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        info!("Config file {} not found, using defaults", path.display());
        return TomlConfig::default();
    }

    match read_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}; using defaults", e);
            TomlConfig::default()
        }
    }
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Write a TOML config file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;

    // Write to a sibling temp file first so readers never see a partial file
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the root folder: CLI argument, environment, TOML, then platform default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hwx"))
        .unwrap_or_else(|| PathBuf::from("./hwx_data"))
}
