//! Cache configuration for the discardable texture cache limits.
//!
//! Configuration can be loaded from a file, environment variables,
//! or created programmatically.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

const MB: usize = 1024 * 1024;

/// Limits of the discardable texture cache.
///
/// The cache starts at `min_cache_size` and grows by `cache_size_growth` for
/// every additional texture registry, never beyond `max_cache_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Initial cache limit in bytes
    pub min_cache_size: usize,
    /// Upper bound for the grown cache limit in bytes
    pub max_cache_size: usize,
    /// Limit increase per additional registry in bytes
    pub cache_size_growth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_cache_size: 64 * MB,
            max_cache_size: 256 * MB,
            cache_size_growth: 32 * MB,
        }
    }
}

/// On-disk form; every key is optional and falls back to the defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    min_cache_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_cache_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_growth_mb: Option<usize>,
}

impl CacheConfig {
    /// Creates a new cache configuration with custom values in megabytes.
    pub fn new(min_mb: usize, max_mb: usize, growth_mb: usize) -> Self {
        Self {
            min_cache_size: min_mb.saturating_mul(MB),
            max_cache_size: max_mb.saturating_mul(MB),
            cache_size_growth: growth_mb.saturating_mul(MB),
        }
    }

    /// Sets the minimum cache size in megabytes.
    pub fn with_min_mb(mut self, mb: usize) -> Self {
        self.min_cache_size = mb.saturating_mul(MB);
        self
    }

    /// Sets the maximum cache size in megabytes.
    pub fn with_max_mb(mut self, mb: usize) -> Self {
        self.max_cache_size = mb.saturating_mul(MB);
        self
    }

    /// Sets the per-registry growth in megabytes.
    pub fn with_growth_mb(mut self, mb: usize) -> Self {
        self.cache_size_growth = mb.saturating_mul(MB);
        self
    }

    /// Checks that the limits are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_cache_size > self.max_cache_size {
            return Err(ConfigError::InvalidLimits {
                min: self.min_cache_size,
                max: self.max_cache_size,
            });
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DISCARDABLE_MIN_CACHE_MB`: minimum cache size in MB (default: 64)
    /// - `DISCARDABLE_MAX_CACHE_MB`: maximum cache size in MB (default: 256)
    /// - `DISCARDABLE_CACHE_GROWTH_MB`: growth per registry in MB (default: 32)
    ///
    /// # Errors
    /// Returns an error if any variable is not a number or the resulting
    /// limits are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bytes) = env_mb("DISCARDABLE_MIN_CACHE_MB")? {
            config.min_cache_size = bytes;
        }
        if let Some(bytes) = env_mb("DISCARDABLE_MAX_CACHE_MB")? {
            config.max_cache_size = bytes;
        }
        if let Some(bytes) = env_mb("DISCARDABLE_CACHE_GROWTH_MB")? {
            config.cache_size_growth = bytes;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// min_cache_mb = 64
    /// max_cache_mb = 256
    /// cache_growth_mb = 32
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();
        if let Some(mb) = file.min_cache_mb {
            config.min_cache_size = mb_to_bytes("min_cache_mb", mb)?;
        }
        if let Some(mb) = file.max_cache_mb {
            config.max_cache_size = mb_to_bytes("max_cache_mb", mb)?;
        }
        if let Some(mb) = file.cache_growth_mb {
            config.cache_size_growth = mb_to_bytes("cache_growth_mb", mb)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            min_cache_mb: Some(self.min_cache_mb()),
            max_cache_mb: Some(self.max_cache_mb()),
            cache_growth_mb: Some(self.cache_growth_mb()),
        };
        Ok(toml::to_string(&file)?)
    }

    /// Returns the minimum cache size in megabytes.
    pub fn min_cache_mb(&self) -> usize {
        self.min_cache_size / MB
    }

    /// Returns the maximum cache size in megabytes.
    pub fn max_cache_mb(&self) -> usize {
        self.max_cache_size / MB
    }

    /// Returns the per-registry growth in megabytes.
    pub fn cache_growth_mb(&self) -> usize {
        self.cache_size_growth / MB
    }
}

/// Reads a size in megabytes from the environment, returned in bytes.
fn env_mb(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(val) => {
            let mb = val
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue(name.to_string()))?;
            mb_to_bytes(name, mb).map(Some)
        }
        Err(_) => Ok(None),
    }
}

fn mb_to_bytes(name: &str, mb: usize) -> Result<usize, ConfigError> {
    mb.checked_mul(MB)
        .ok_or_else(|| ConfigError::InvalidValue(name.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),

    #[error("Minimum cache size {min} exceeds maximum {max}")]
    InvalidLimits { min: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 3] = [
        "DISCARDABLE_MIN_CACHE_MB",
        "DISCARDABLE_MAX_CACHE_MB",
        "DISCARDABLE_CACHE_GROWTH_MB",
    ];

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.min_cache_size, 64 * MB);
        assert_eq!(config.max_cache_size, 256 * MB);
        assert_eq!(config.cache_size_growth, 32 * MB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_min_mb(1)
            .with_max_mb(2)
            .with_growth_mb(1);
        assert_eq!(config, CacheConfig::new(1, 2, 1));
        assert_eq!(config.min_cache_mb(), 1);
        assert_eq!(config.max_cache_mb(), 2);
        assert_eq!(config.cache_growth_mb(), 1);
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let config = CacheConfig::new(8, 4, 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimits { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&VARS);

        env::set_var("DISCARDABLE_MIN_CACHE_MB", "16");
        env::set_var("DISCARDABLE_MAX_CACHE_MB", "128");
        env::set_var("DISCARDABLE_CACHE_GROWTH_MB", "8");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config, CacheConfig::new(16, 128, 8));
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&VARS);

        env::remove_var("DISCARDABLE_MAX_CACHE_MB");
        env::remove_var("DISCARDABLE_CACHE_GROWTH_MB");
        env::set_var("DISCARDABLE_MIN_CACHE_MB", "16");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.min_cache_size, 16 * MB);
        assert_eq!(config.max_cache_size, 256 * MB); // default
        assert_eq!(config.cache_size_growth, 32 * MB); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&VARS);

        env::set_var("DISCARDABLE_MIN_CACHE_MB", "not_a_number");
        let result = CacheConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_overflow() {
        let _guard = EnvGuard::new(&VARS);

        env::remove_var("DISCARDABLE_MIN_CACHE_MB");
        env::remove_var("DISCARDABLE_CACHE_GROWTH_MB");
        env::set_var("DISCARDABLE_MAX_CACHE_MB", usize::MAX.to_string());
        let result = CacheConfig::from_env();
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(ref key)) if key == "DISCARDABLE_MAX_CACHE_MB")
        );
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Test configuration
            min_cache_mb = 1
            max_cache_mb = 2
            cache_growth_mb = 1
        "#;

        let config = CacheConfig::from_toml(toml).unwrap();
        assert_eq!(config, CacheConfig::new(1, 2, 1));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml("max_cache_mb = 512").unwrap();
        assert_eq!(config.min_cache_size, 64 * MB); // default
        assert_eq!(config.max_cache_size, 512 * MB);
    }

    #[test]
    fn test_from_toml_unknown_key() {
        let result = CacheConfig::from_toml("ram_cache_mb = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_toml_overflow() {
        let toml = format!("max_cache_mb = {}", usize::MAX / MB + 1);
        let result = CacheConfig::from_toml(&toml);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(ref key)) if key == "max_cache_mb")
        );
    }

    #[test]
    fn test_builders_saturate() {
        let config = CacheConfig::default().with_max_mb(usize::MAX);
        assert_eq!(config.max_cache_size, usize::MAX);
        assert_eq!(CacheConfig::new(1, usize::MAX, 1).max_cache_size, usize::MAX);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CacheConfig::new(4, 16, 2);
        let toml = config.to_toml().unwrap();
        assert_eq!(CacheConfig::from_toml(&toml).unwrap(), config);
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("discardable.toml");

        let config = CacheConfig::new(4, 16, 2);
        config.save_to_file(&config_path).unwrap();

        let loaded = CacheConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CacheConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
