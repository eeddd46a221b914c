//! Configuration loading
//!
//! Values resolve in priority order:
//! 1. Command-line argument (applied by the service binary)
//! 2. Environment variable (`RUSLE_*`)
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing TOML file is not fatal: a warning is logged and defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "RUSLE_CONFIG";

/// Root of the TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub compute: ComputeConfig,
    pub sessions: SessionConfig,
    pub logging: LoggingConfig,
    pub catalog: CatalogConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5730,
        }
    }
}

/// Processing limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted area of interest
    pub max_aoi_area_km2: f64,
    /// Export scale used when a request does not name one (meters)
    pub default_export_scale: u32,
    pub min_export_scale: u32,
    pub max_export_scale: u32,
    pub max_upload_size_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_aoi_area_km2: 50_000.0,
            default_export_scale: 90,
            min_export_scale: 10,
            max_export_scale: 1000,
            max_upload_size_mb: 50,
        }
    }
}

/// Remote Earth-observation compute service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Upper bound on a lookup call (dataset, expression registration, export poll)
    pub request_timeout_secs: u64,
    /// Upper bound on a single materialization (tile, statistics, export start)
    pub materialize_timeout_secs: u64,
    /// Attempts for transient failures, first attempt included
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub requests_per_second: u32,
    /// Default export destination folder
    pub export_folder: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8085/v1".to_string(),
            api_key: None,
            request_timeout_secs: 60,
            materialize_timeout_secs: 300,
            max_retries: 3,
            retry_backoff_ms: 500,
            requests_per_second: 10,
            export_folder: "RUSLE_exports".to_string(),
        }
    }
}

/// Upload session and job lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Terminal jobs are discarded this long after finishing
    pub job_retention_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
            job_retention_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Administrative boundary catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// GeoJSON FeatureCollection of administrative boundaries
    pub boundaries_path: Option<PathBuf>,
}

impl TomlConfig {
    /// Load configuration from TOML, then apply `RUSLE_*` environment overrides.
    ///
    /// `explicit_path` (or `RUSLE_CONFIG`) must exist when given; otherwise the
    /// platform config locations are searched and defaults are used if none exists.
    pub fn resolve(explicit_path: Option<&Path>) -> Result<Self> {
        let explicit = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => load_toml_config(&path)?,
            None => match default_config_path() {
                Some(path) => load_toml_config(&path)?,
                None => {
                    warn!("No config file found, using compiled defaults");
                    TomlConfig::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `RUSLE_*` environment variables onto this configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = env_string("RUSLE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("RUSLE_PORT")? {
            self.server.port = port;
        }
        if let Some(area) = env_parse::<f64>("RUSLE_MAX_AOI_AREA_KM2")? {
            self.limits.max_aoi_area_km2 = area;
        }
        if let Some(scale) = env_parse::<u32>("RUSLE_DEFAULT_EXPORT_SCALE")? {
            self.limits.default_export_scale = scale;
        }
        if let Some(url) = env_string("RUSLE_COMPUTE_URL") {
            self.compute.base_url = url;
        }
        if let Some(key) = env_string("RUSLE_COMPUTE_API_KEY") {
            self.compute.api_key = Some(key);
        }
        if let Some(ttl) = env_parse::<u64>("RUSLE_SESSION_TTL_SECS")? {
            self.sessions.ttl_secs = ttl;
        }
        if let Some(level) = env_string("RUSLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = env_string("RUSLE_BOUNDARY_CATALOG") {
            self.catalog.boundaries_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject inconsistent limits before the service starts
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if !(limits.max_aoi_area_km2.is_finite() && limits.max_aoi_area_km2 > 0.0) {
            return Err(Error::Config(format!(
                "limits.max_aoi_area_km2 must be positive, got {}",
                limits.max_aoi_area_km2
            )));
        }
        if limits.min_export_scale == 0 || limits.min_export_scale > limits.max_export_scale {
            return Err(Error::Config(format!(
                "invalid export scale bounds {}..={}",
                limits.min_export_scale, limits.max_export_scale
            )));
        }
        if !(limits.min_export_scale..=limits.max_export_scale)
            .contains(&limits.default_export_scale)
        {
            return Err(Error::Config(format!(
                "limits.default_export_scale {} outside {}..={}",
                limits.default_export_scale, limits.min_export_scale, limits.max_export_scale
            )));
        }
        if self.compute.max_retries == 0 {
            return Err(Error::Config("compute.max_retries must be at least 1".to_string()));
        }
        if self.compute.requests_per_second == 0 {
            return Err(Error::Config(
                "compute.requests_per_second must be at least 1".to_string(),
            ));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "sessions.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// First existing platform config file: user config dir, then /etc
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("rusle").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/rusle/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }
    None
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={} is invalid: {}", name, raw, e))),
        None => Ok(None),
    }
}
