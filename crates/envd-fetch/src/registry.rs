//! Image configuration lookup over the OCI distribution API.

use envd_common::error::{EnvdError, Result};
use envd_common::types::Platform;
use envd_ir::types::ImageMetadata;
use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use tokio::runtime::Runtime;

/// Config blob of an image.
#[derive(Debug, Default, Deserialize)]
struct OciConfig {
    #[serde(default)]
    config: OciContainerConfig,
}

#[derive(Debug, Default, Deserialize)]
struct OciContainerConfig {
    #[serde(rename = "Entrypoint")]
    entrypoint: Option<Vec<String>>,
    #[serde(rename = "Env")]
    env: Option<Vec<String>>,
    #[serde(rename = "WorkingDir")]
    working_dir: Option<String>,
    #[serde(rename = "User")]
    user: Option<String>,
}

/// Extracts the inherited configuration from a config blob.
///
/// Empty user and working dir strings count as unset.
fn metadata_from_config(image: &str, raw: &str) -> Result<ImageMetadata> {
    let parsed: OciConfig = serde_json::from_str(raw).map_err(|e| EnvdError::ImageMetadataFetchFailed {
        image: image.to_string(),
        reason: format!("failed to parse image config: {e}"),
    })?;
    let config = parsed.config;
    Ok(ImageMetadata {
        env: config.env.unwrap_or_default(),
        entrypoint: config.entrypoint.unwrap_or_default(),
        user: config.user.filter(|u| !u.is_empty()),
        working_dir: config.working_dir.filter(|d| !d.is_empty()),
    })
}

/// Picks the manifest matching `os/architecture` from an image index.
fn select_manifest(manifests: &[ImageIndexEntry], os: &str, architecture: &str) -> Option<String> {
    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == os && p.architecture == architecture)
        })
        .map(|entry| entry.digest.clone())
}

/// Blocking registry client.
pub struct RegistryClient {
    runtime: Runtime,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient").finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Creates a client with its own single-threaded runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Io`] if the runtime cannot be started.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EnvdError::Io {
                path: "tokio-runtime".into(),
                source: e,
            })?;
        Ok(Self { runtime })
    }

    /// Fetches the configuration of `image` for `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::ImageMetadataFetchFailed`] if the reference is
    /// invalid, the registry cannot be reached, or the config is malformed.
    pub fn image_metadata(&self, image: &str, platform: &Platform) -> Result<ImageMetadata> {
        let failed = |reason: String| EnvdError::ImageMetadataFetchFailed {
            image: image.to_string(),
            reason,
        };
        let reference = Reference::try_from(image).map_err(|e| failed(e.to_string()))?;
        let os = platform.os.clone();
        let architecture = platform.architecture.clone();
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["localhost".to_string()]),
            platform_resolver: Some(Box::new(move |manifests: &[ImageIndexEntry]| {
                select_manifest(manifests, &os, &architecture)
            })),
            ..Default::default()
        };
        let mut client = Client::new(config);
        tracing::debug!(image, platform = %platform, "fetch image config");
        let (_, digest, raw) = self
            .runtime
            .block_on(client.pull_manifest_and_config(&reference, &RegistryAuth::Anonymous))
            .map_err(|e| failed(e.to_string()))?;
        tracing::debug!(image, digest = %digest, "fetched image config");
        metadata_from_config(image, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_fields_are_inherited() {
        let raw = r#"{
            "architecture": "amd64",
            "config": {
                "Env": ["PATH=/usr/local/bin:/usr/bin", "LANG=C.UTF-8"],
                "Entrypoint": ["python"],
                "User": "app",
                "WorkingDir": "/srv"
            }
        }"#;
        let metadata = metadata_from_config("python:3.11", raw).expect("metadata");
        assert_eq!(metadata.env, ["PATH=/usr/local/bin:/usr/bin", "LANG=C.UTF-8"]);
        assert_eq!(metadata.entrypoint, ["python"]);
        assert_eq!(metadata.user.as_deref(), Some("app"));
        assert_eq!(metadata.working_dir.as_deref(), Some("/srv"));
    }

    #[test]
    fn empty_user_and_workdir_are_unset() {
        let raw = r#"{"config": {"User": "", "WorkingDir": ""}}"#;
        let metadata = metadata_from_config("ubuntu:22.04", raw).expect("metadata");
        assert_eq!(metadata.user, None);
        assert_eq!(metadata.working_dir, None);
        assert!(metadata.env.is_empty());
    }

    #[test]
    fn missing_config_section_is_tolerated() {
        let metadata = metadata_from_config("scratch", "{}").expect("metadata");
        assert_eq!(metadata, ImageMetadata::default());
    }

    #[test]
    fn malformed_config_is_reported() {
        let err = metadata_from_config("broken", "not json").unwrap_err();
        assert!(matches!(err, EnvdError::ImageMetadataFetchFailed { .. }));
    }
}
