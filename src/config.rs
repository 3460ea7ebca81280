//! Configuration management for volsync

use crate::db::{PublicKey, PUBLIC_KEY_LEN};
use crate::error::{Error, Result};
use crate::fs::DEFAULT_MAX_BATCH;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the config file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Local peer identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Public key announced as peer 0 in sync messages (hex)
    pub public_key: PublicKey,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            public_key: PublicKey([0; PUBLIC_KEY_LEN]),
        }
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum children per sync message
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            batch_size: DEFAULT_MAX_BATCH,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the data directory
    pub data_dir: PathBuf,

    /// Metadata database path
    pub db_path: PathBuf,

    /// Directory holding snapshot chunks
    pub chunk_dir: PathBuf,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config::with_data_dir(
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("volsync"),
        )
    }
}

impl Config {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Config {
            db_path: data_dir.join("meta.db"),
            chunk_dir: data_dir.join("chunks"),
            data_dir,
            identity: IdentityConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        Config::default().data_dir.join(CONFIG_FILE)
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        // Override with environment variables if set
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("VOLSYNC_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                let relocated = Config::with_data_dir(dir);
                self.data_dir = relocated.data_dir;
                self.db_path = relocated.db_path;
                self.chunk_dir = relocated.chunk_dir;
            }
        }

        if let Ok(level) = std::env::var("VOLSYNC_LOG_LEVEL") {
            let level = level.trim().to_lowercase();
            if !level.is_empty() {
                self.logging.level = level;
            }
        }

        if let Ok(batch) = std::env::var("VOLSYNC_SYNC_BATCH") {
            match batch.trim().parse::<usize>() {
                Ok(size) => self.sync.batch_size = size,
                Err(e) => warn!(
                    "Ignoring VOLSYNC_SYNC_BATCH={:?}: {}; keeping batch size {}",
                    batch, e, self.sync.batch_size
                ),
            }
        }
    }

    /// Create a new config for `init`: defaults, environment overrides and
    /// a freshly generated identity
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.generate_identity()?;
        Ok(config)
    }

    /// Replace the identity key with random bytes
    pub fn generate_identity(&mut self) -> Result<()> {
        let mut key = [0u8; PUBLIC_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| Error::Entropy(e.to_string()))?;
        self.identity.public_key = PublicKey(key);
        Ok(())
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "Sync batch size must be greater than 0".to_string(),
            ));
        }

        if self.identity.public_key.as_bytes().iter().all(|b| *b == 0) {
            return Err(Error::InvalidConfig(
                "Identity public key is not set".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unknown log level: {}",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.chunk_dir)?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(dir: &Path) -> Config {
        let mut config = Config::with_data_dir(dir);
        config.generate_identity().unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::with_data_dir("/tmp/vs");
        assert_eq!(config.db_path, PathBuf::from("/tmp/vs/meta.db"));
        assert_eq!(config.chunk_dir, PathBuf::from("/tmp/vs/chunks"));
        assert_eq!(config.sync.batch_size, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_config(dir.path());
        let path = dir.path().join(CONFIG_FILE);
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains(&config.identity.public_key.to_string()));

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.identity.public_key, config.identity.public_key);
        assert_eq!(loaded.db_path, config.db_path);
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.validate().unwrap();

        config.sync.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = valid_config(dir.path());
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        // An unset identity is rejected
        assert!(Config::with_data_dir(dir.path()).validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("nope.json"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    /// Log sink shared with the test
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bad_batch_override_is_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut config = Config::with_data_dir("/tmp/vs");
        std::env::set_var("VOLSYNC_SYNC_BATCH", "lots");
        tracing::subscriber::with_default(subscriber, || config.apply_env_overrides());
        std::env::remove_var("VOLSYNC_SYNC_BATCH");

        assert_eq!(config.sync.batch_size, DEFAULT_MAX_BATCH);
        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("VOLSYNC_SYNC_BATCH"), "log was: {}", logged);
        assert!(logged.contains("lots"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_config(&dir.path().join("nested"));
        config.ensure_directories().unwrap();
        assert!(config.data_dir.is_dir());
        assert!(config.chunk_dir.is_dir());
    }
}
