//! Global configuration model for the envd compiler.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EnvdError, Result};
use crate::types::{MarketplaceVendor, StageCompositionStrategy};

/// Seconds a cached "latest GitHub release" lookup stays fresh.
pub const DEFAULT_RELEASE_CACHE_TTL_SECS: u64 = 3600;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Root configuration for the envd compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvdConfig {
    /// Directory holding envd configuration and SSH keys.
    pub config_dir: PathBuf,
    /// Directory holding downloaded plugins, frameworks, and lookup caches.
    pub cache_dir: PathBuf,
    /// Freshness window of the GitHub release cache.
    pub release_cache_ttl_secs: u64,
    /// Marketplace used for VSCode extensions.
    pub marketplace: MarketplaceVendor,
    /// Stage composition used unless the builder requires otherwise.
    pub composition: StageCompositionStrategy,
}

impl Default for EnvdConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            config_dir: home.join(".config").join("envd"),
            cache_dir: home.join(".cache").join("envd"),
            release_cache_ttl_secs: DEFAULT_RELEASE_CACHE_TTL_SECS,
            marketplace: MarketplaceVendor::default(),
            composition: StageCompositionStrategy::default(),
        }
    }
}

impl EnvdConfig {
    /// Loads the configuration from the default location.
    ///
    /// `ENVD_CONFIG_DIR` and `ENVD_CACHE_DIR` override the directories, and
    /// a missing configuration file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn discover() -> Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os("ENVD_CONFIG_DIR") {
            config.config_dir = PathBuf::from(dir);
        }
        let file = config.config_dir.join(CONFIG_FILE_NAME);
        if file.exists() {
            let config_dir = config.config_dir;
            config = Self::load(&file)?;
            config.config_dir = config_dir;
        }
        if let Some(dir) = std::env::var_os("ENVD_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        tracing::debug!(
            config_dir = %config.config_dir.display(),
            cache_dir = %config.cache_dir.display(),
            "resolved envd configuration"
        );
        Ok(config)
    }

    /// Loads the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EnvdError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Creates the cache directory if it does not exist and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_cache_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| EnvdError::Io {
            path: self.cache_dir.clone(),
            source: e,
        })?;
        Ok(&self.cache_dir)
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"release_cache_ttl_secs": 60}"#).expect("write");

        let config = EnvdConfig::load(&path).expect("load");
        assert_eq!(config.release_cache_ttl_secs, 60);
        assert_eq!(config.marketplace, MarketplaceVendor::OpenVsx);
        assert_eq!(config.composition, StageCompositionStrategy::Merge);
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "not json").expect("write");
        assert!(EnvdConfig::load(&path).is_err());
    }

    #[test]
    fn ensure_cache_dir_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EnvdConfig {
            cache_dir: dir.path().join("nested").join("cache"),
            ..EnvdConfig::default()
        };
        let created = config.ensure_cache_dir().expect("create");
        assert!(created.is_dir());
    }
}
