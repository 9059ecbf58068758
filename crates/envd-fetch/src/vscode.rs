//! VSCode extension downloads.
//!
//! Extensions are fetched as `.vsix` archives and unpacked once into
//! `<cache_dir>/<plugin>/`, so the build can copy `<plugin>/extension/`
//! out of the cache dir local source.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use envd_common::error::{EnvdError, Result};
use envd_common::types::MarketplaceVendor;
use envd_ir::Plugin;
use serde::Deserialize;

const OPEN_VSX_API: &str = "https://open-vsx.org/api";

#[derive(Debug, Deserialize)]
struct OpenVsxFiles {
    download: String,
}

#[derive(Debug, Deserialize)]
struct OpenVsxExtension {
    files: OpenVsxFiles,
}

/// Download URL of a pinned extension.
fn pinned_url(vendor: MarketplaceVendor, plugin: &Plugin, version: &str) -> String {
    let Plugin {
        publisher,
        extension,
        ..
    } = plugin;
    match vendor {
        MarketplaceVendor::OpenVsx => {
            format!("{OPEN_VSX_API}/{publisher}/{extension}/{version}/file/{publisher}.{extension}-{version}.vsix")
        }
        MarketplaceVendor::VsCode => format!(
            "https://{publisher}.gallery.vsassets.io/_apis/public/gallery/publisher/{publisher}/extension/{extension}/{version}/assetbyname/Microsoft.VisualStudio.Services.VSIXPackage"
        ),
    }
}

/// Downloads and unpacks extensions into the cache dir.
#[derive(Debug)]
pub struct VscodeClient {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
    vendor: MarketplaceVendor,
}

impl VscodeClient {
    /// Creates a client for `vendor`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] if the HTTP client cannot be built.
    pub fn new(cache_dir: &Path, vendor: MarketplaceVendor) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("envd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| EnvdError::Config {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            cache_dir: cache_dir.to_path_buf(),
            vendor,
        })
    }

    /// Directory the plugin is unpacked into.
    #[must_use]
    pub fn plugin_dir(&self, plugin: &Plugin) -> PathBuf {
        self.cache_dir.join(plugin.to_string())
    }

    /// Makes the unpacked plugin available, returning `true` if it already was.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::ToolDownloadFailed`] if the download or unpacking fails.
    pub fn ensure(&self, plugin: &Plugin) -> Result<bool> {
        let dir = self.plugin_dir(plugin);
        if dir.join("extension").is_dir() {
            tracing::debug!(plugin = %plugin, "vscode plugin is cached");
            return Ok(true);
        }
        let url = self.download_url(plugin)?;
        tracing::info!(plugin = %plugin, url = %url, "download vscode plugin");
        let bytes = self
            .client
            .get(&url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::bytes)
            .map_err(|e| failed(plugin, &e.to_string()))?;
        unpack(&bytes, &dir).map_err(|e| failed(plugin, &e.to_string()))?;
        Ok(false)
    }

    fn download_url(&self, plugin: &Plugin) -> Result<String> {
        if let Some(version) = &plugin.version {
            return Ok(pinned_url(self.vendor, plugin, version));
        }
        match self.vendor {
            MarketplaceVendor::OpenVsx => {
                let url = format!("{OPEN_VSX_API}/{}/{}/latest", plugin.publisher, plugin.extension);
                let latest: OpenVsxExtension = self
                    .client
                    .get(&url)
                    .send()
                    .and_then(reqwest::blocking::Response::error_for_status)
                    .and_then(|response| response.json())
                    .map_err(|e| failed(plugin, &e.to_string()))?;
                Ok(latest.files.download)
            }
            MarketplaceVendor::VsCode => Ok(pinned_url(self.vendor, plugin, "latest")),
        }
    }
}

fn failed(plugin: &Plugin, reason: &str) -> EnvdError {
    EnvdError::ToolDownloadFailed {
        tool: format!("vscode plugin {plugin}"),
        reason: reason.to_string(),
    }
}

/// Extracts a `.vsix` archive into `dir`, replacing a partial previous attempt.
fn unpack(bytes: &[u8], dir: &Path) -> std::result::Result<(), zip::result::ZipError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    archive.extract(dir)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn plugin(value: &str) -> Plugin {
        Plugin::parse(value).expect("plugin")
    }

    fn vsix() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("extension/package.json", SimpleFileOptions::default())
            .expect("start");
        writer.write_all(br#"{"name": "python"}"#).expect("write");
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn pinned_urls_per_vendor() {
        let p = plugin("ms-python.python-2021.5.0");
        assert_eq!(
            pinned_url(MarketplaceVendor::OpenVsx, &p, "2021.5.0"),
            "https://open-vsx.org/api/ms-python/python/2021.5.0/file/ms-python.python-2021.5.0.vsix"
        );
        assert!(
            pinned_url(MarketplaceVendor::VsCode, &p, "2021.5.0")
                .starts_with("https://ms-python.gallery.vsassets.io/_apis/public/gallery/publisher/ms-python/extension/python/2021.5.0/")
        );
    }

    #[test]
    fn unpack_extracts_the_extension_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("ms-python.python");
        unpack(&vsix(), &target).expect("unpack");
        assert!(target.join("extension").join("package.json").is_file());
    }

    #[test]
    fn cached_plugin_is_not_downloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = VscodeClient::new(dir.path(), MarketplaceVendor::OpenVsx).expect("client");
        let p = plugin("ms-python.python");
        std::fs::create_dir_all(client.plugin_dir(&p).join("extension")).expect("mkdir");
        assert!(client.ensure(&p).expect("cached"));
    }
}
