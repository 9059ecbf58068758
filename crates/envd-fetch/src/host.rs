//! The production [`CompileHost`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use envd_common::config::EnvdConfig;
use envd_common::error::Result;
use envd_common::types::Platform;
use envd_ir::types::ImageMetadata;
use envd_ir::{CompileHost, Plugin};

use crate::registry::RegistryClient;
use crate::release::ReleaseResolver;
use crate::vscode::VscodeClient;
use crate::zsh::ensure_oh_my_zsh;

/// Answers compiler lookups from the network and the envd cache dir.
#[derive(Debug)]
pub struct NetworkHost {
    cache_dir: PathBuf,
    registry: RegistryClient,
    releases: ReleaseResolver,
    vscode: VscodeClient,
}

impl NetworkHost {
    /// Creates a host for `config`, creating the cache dir if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache dir cannot be created or a client
    /// cannot be built.
    pub fn new(config: &EnvdConfig) -> Result<Self> {
        let cache_dir = config.ensure_cache_dir()?.to_path_buf();
        Ok(Self {
            registry: RegistryClient::new()?,
            releases: ReleaseResolver::new(
                &cache_dir,
                Duration::from_secs(config.release_cache_ttl_secs),
            )?,
            vscode: VscodeClient::new(&cache_dir, config.marketplace)?,
            cache_dir,
        })
    }
}

impl CompileHost for NetworkHost {
    fn image_metadata(&mut self, image: &str, platform: &Platform) -> Result<ImageMetadata> {
        self.registry.image_metadata(image, platform)
    }

    fn vscode_plugin(&mut self, plugin: &Plugin) -> Result<bool> {
        self.vscode.ensure(plugin)
    }

    fn oh_my_zsh(&mut self) -> Result<bool> {
        ensure_oh_my_zsh(&self.cache_dir)
    }

    fn latest_release(&mut self, owner: &str, repo: &str) -> Result<String> {
        self.releases.latest(owner, repo)
    }

    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
