//! Configuration management for sealdrop

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Payloads at or below this size are encrypted as one piece: 10MB
pub const DEFAULT_INLINE_THRESHOLD: usize = 10 * 1024 * 1024;

/// Part size for chunked encryption of large payloads: 5MB
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default upload session timeout: 1 hour
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;

/// Default TTL for records held in ephemeral tiers: 5 minutes
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Encryption configuration
    pub encryption: EncryptionConfig,

    /// Retention and quota bounds
    pub limits: LimitsConfig,

    /// Codec chunking configuration
    pub chunk: ChunkConfig,

    /// Upload session configuration
    pub upload: UploadConfig,

    /// Storage tier configuration
    pub storage: StorageConfig,

    /// Path to the data directory
    pub data_dir: PathBuf,
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,

    /// Salt for key derivation (generated if empty)
    #[serde(with = "hex_serde")]
    pub salt: Vec<u8>,
}

/// Bounds on caller-supplied retention windows and download quotas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Minimum retention in days
    pub min_retention_days: u32,

    /// Maximum retention in days
    pub max_retention_days: u32,

    /// Minimum allowed max-download quota
    pub min_downloads: u32,

    /// Maximum allowed max-download quota
    pub max_downloads: u32,
}

/// Codec chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Payloads larger than this are split before encryption
    pub inline_threshold: usize,

    /// Size of each encrypted part for chunked payloads
    pub chunk_size: usize,
}

/// Upload session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Seconds an incomplete session may live before the sweep discards it
    pub session_timeout_secs: u64,

    /// Seconds between maintenance sweeps
    pub sweep_interval_secs: u64,

    /// Upper bound on random jitter added to each sweep interval
    pub sweep_jitter_secs: u64,
}

/// Storage tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// TTL for copies held in ephemeral tiers (seconds)
    pub cache_ttl_secs: u64,

    /// Per-secondary-tier propagation timeout (milliseconds)
    pub propagation_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sealdrop");

        Config {
            encryption: EncryptionConfig::default(),
            limits: LimitsConfig::default(),
            chunk: ChunkConfig::default(),
            upload: UploadConfig::default(),
            storage: StorageConfig::default(),
            data_dir,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            argon2_memory_kib: 65536, // 64 MiB
            argon2_iterations: 3,
            argon2_parallelism: 4,
            salt: Vec::new(), // Generated on first use
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            min_retention_days: 1,
            max_retention_days: 30,
            min_downloads: 1,
            max_downloads: 100,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            sweep_interval_secs: 60,
            sweep_jitter_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            propagation_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(days) = std::env::var("SEALDROP_MAX_RETENTION_DAYS") {
            if let Ok(d) = days.trim().parse::<u32>() {
                self.limits.max_retention_days = d;
            }
        }

        if let Ok(downloads) = std::env::var("SEALDROP_MAX_DOWNLOADS") {
            if let Ok(d) = downloads.trim().parse::<u32>() {
                self.limits.max_downloads = d;
            }
        }

        if let Ok(timeout) = std::env::var("SEALDROP_SESSION_TIMEOUT_SECS") {
            if let Ok(t) = timeout.trim().parse::<u64>() {
                self.upload.session_timeout_secs = t;
            }
        }

        if let Ok(ttl) = std::env::var("SEALDROP_CACHE_TTL_SECS") {
            if let Ok(t) = ttl.trim().parse::<u64>() {
                self.storage.cache_ttl_secs = t;
            }
        }

        if let Ok(dir) = std::env::var("SEALDROP_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.limits.min_retention_days == 0 {
            return Err(Error::InvalidConfig(
                "Minimum retention must be at least 1 day".to_string(),
            ));
        }

        if self.limits.max_retention_days < self.limits.min_retention_days {
            return Err(Error::InvalidConfig(
                "Maximum retention is below the minimum".to_string(),
            ));
        }

        if self.limits.min_downloads == 0 {
            return Err(Error::InvalidConfig(
                "Minimum download quota must be at least 1".to_string(),
            ));
        }

        if self.limits.max_downloads < self.limits.min_downloads {
            return Err(Error::InvalidConfig(
                "Maximum download quota is below the minimum".to_string(),
            ));
        }

        if self.chunk.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if self.chunk.inline_threshold < self.chunk.chunk_size {
            return Err(Error::InvalidConfig(
                "Inline threshold must be at least one chunk".to_string(),
            ));
        }

        if self.upload.session_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "Session timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Hex serialization for byte arrays
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = Config::default();
        config.limits.min_retention_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = Config::default();
        config.limits.max_downloads = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_retention_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_below_chunk_rejected() {
        let mut config = Config::default();
        config.chunk.inline_threshold = config.chunk.chunk_size - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(
            loaded.limits.max_retention_days,
            config.limits.max_retention_days
        );
        assert_eq!(loaded.chunk.chunk_size, config.chunk.chunk_size);
    }
}
