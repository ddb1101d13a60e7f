//! Worker configuration: a TOML file (spec.md §6 CLI surface) with every
//! field overridable by an environment variable, in the spirit of the
//! teacher's `EnvSettings` (CLI args layered over `env::var`) but with a
//! file as the primary source, per spec.md.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_secs: u64,
    pub product_globs: Vec<String>,
    pub product_excludes: Vec<String>,
    pub specific_maps: Option<Vec<String>>,
    pub single_thread: bool,
    pub catch_scan_exceptions: bool,
    pub cache_path: String,
    /// The `e` component packed into every [`crate::ReleaseId`] this
    /// worker mints from oracle version rows (spec.md §3 leaves the
    /// epoch's meaning to the deployment; a single worker process
    /// watches one epoch at a time — see DESIGN.md).
    pub release_epoch: u32,
    pub lod_levels: BTreeSet<u8>,
    pub compression: CompressionConfig,
    pub blob_store: BlobStoreConfig,
    pub database_url: String,
    pub version_oracle_url: String,
    pub listfile_url: String,
    pub log_level: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            poll_interval_secs: 30,
            product_globs: vec!["wow*".to_string()],
            product_excludes: Vec::new(),
            specific_maps: None,
            single_thread: false,
            catch_scan_exceptions: true,
            cache_path: "cache".to_string(),
            release_epoch: 0,
            lod_levels: [0u8, 1, 2, 3].into_iter().collect(),
            compression: CompressionConfig::default(),
            blob_store: BlobStoreConfig::default(),
            database_url: String::new(),
            version_oracle_url: String::new(),
            listfile_url: String::new(),
            log_level: "info".to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub baseline: CompressionSpec,
    pub lod: CompressionSpec,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            baseline: CompressionSpec { kind: "lossless".to_string(), method: 4, quality: 100.0 },
            lod: CompressionSpec { kind: "lossy".to_string(), method: 4, quality: 90.0 },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub method: u8,
    pub quality: f32,
}

impl Default for CompressionSpec {
    fn default() -> Self {
        CompressionSpec { kind: "lossless".to_string(), method: 4, quality: 100.0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    pub kind: String,
    pub local_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        BlobStoreConfig {
            kind: "local".to_string(),
            local_path: "cache/tiles".to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub permits: u32,
    pub window_secs: u64,
    pub max_concurrent: usize,
    pub retry_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_cap_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            permits: 600,
            window_secs: 60,
            max_concurrent: 3,
            retry_attempts: 3,
            retry_base_secs: 1,
            retry_cap_secs: 30,
        }
    }
}

impl Settings {
    /// Load from a TOML file, then apply environment-variable overrides.
    /// Every field name becomes `MAPSCAN_<FIELD_NAME_UPPER_SNAKE>`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        let mut settings: Settings = toml::from_str(&text)
            .map_err(|e| CoreError::InvalidConfig(format!("parsing {}: {e}", path.display())))?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Re-read the same file and re-apply overrides, for the `SIGHUP`
    /// reload path (spec.md §6 "Reload configuration", left
    /// unimplemented by the teacher's analogous arm).
    pub fn reload(&self, path: &Path) -> Result<Self, CoreError> {
        Settings::load(path)
    }

    fn apply_env_overrides(&mut self) {
        env_override("MAPSCAN_POLL_INTERVAL_SECS", &mut self.poll_interval_secs);
        env_override("MAPSCAN_SINGLE_THREAD", &mut self.single_thread);
        env_override("MAPSCAN_CATCH_SCAN_EXCEPTIONS", &mut self.catch_scan_exceptions);
        env_override_string("MAPSCAN_CACHE_PATH", &mut self.cache_path);
        env_override_string("MAPSCAN_DATABASE_URL", &mut self.database_url);
        env_override_string("MAPSCAN_VERSION_ORACLE_URL", &mut self.version_oracle_url);
        env_override_string("MAPSCAN_LISTFILE_URL", &mut self.listfile_url);
        env_override_string("MAPSCAN_LOG_LEVEL", &mut self.log_level);
        if let Ok(value) = std::env::var("MAPSCAN_PRODUCT_GLOBS") {
            self.product_globs = value.split(',').map(|s| s.trim().to_string()).collect();
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.database_url.is_empty() {
            return Err(CoreError::InvalidConfig("database_url must not be empty".to_string()));
        }
        if !self.lod_levels.contains(&0) {
            return Err(CoreError::InvalidConfig("lod_levels must contain level 0".to_string()));
        }
        if self.lod_levels.iter().any(|l| *l > 6) {
            return Err(CoreError::InvalidConfig("lod_levels must be a subset of 0..=6".to_string()));
        }
        if self.compression.baseline.kind != "lossless" {
            return Err(CoreError::InvalidConfig(
                "compression.baseline.type must be \"lossless\" — base-level tiles are a startup invariant per spec.md §4.4".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(name: &str, field: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse() {
            *field = parsed;
        }
    }
}

fn env_override_string(name: &str, field: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *field = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_lossy_baseline() {
        let mut settings = Settings::default();
        settings.database_url = "postgres://localhost/mapscan".to_string();
        settings.compression.baseline.kind = "lossy".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn requires_lod_level_zero() {
        let mut settings = Settings::default();
        settings.database_url = "postgres://localhost/mapscan".to_string();
        settings.lod_levels = [1u8, 2].into_iter().collect();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn default_is_valid_once_database_url_set() {
        let mut settings = Settings::default();
        settings.database_url = "postgres://localhost/mapscan".to_string();
        assert!(settings.validate().is_ok());
    }
}
