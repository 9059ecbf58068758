//! Source identifiers for images, the build context, and HTTP downloads.

use std::collections::BTreeMap;

use envd_common::types::{Digest, Identity};

use crate::op::SourceOp;

const DEFAULT_REGISTRY: &str = "docker.io";

/// Options of an HTTP source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpOptions {
    /// Expected digest of the downloaded file.
    pub checksum: Option<Digest>,
    /// Name of the file inside the resulting filesystem.
    pub filename: Option<String>,
    /// Owner of the downloaded file.
    pub owner: Option<Identity>,
    /// Permission bits of the downloaded file.
    pub mode: Option<u32>,
}

impl HttpOptions {
    /// Sets the expected checksum.
    #[must_use]
    pub fn checksum(mut self, checksum: Digest) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Sets the target filename.
    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the owner.
    #[must_use]
    pub const fn owner(mut self, owner: Identity) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Expands a short image reference to its fully qualified form.
///
/// `ubuntu:22.04` becomes `docker.io/library/ubuntu:22.04` and a missing tag
/// becomes `latest`.
#[must_use]
pub fn normalize_image_reference(reference: &str) -> String {
    let (name, suffix) = split_tag(reference);
    let qualified = match name.split_once('/') {
        None => format!("{DEFAULT_REGISTRY}/library/{name}"),
        Some((first, _)) if is_registry_host(first) => name.to_string(),
        Some(_) => format!("{DEFAULT_REGISTRY}/{name}"),
    };
    match suffix {
        Some(suffix) => format!("{qualified}{suffix}"),
        None => format!("{qualified}:latest"),
    }
}

fn split_tag(reference: &str) -> (&str, Option<&str>) {
    if let Some(at) = reference.find('@') {
        return (&reference[..at], Some(&reference[at..]));
    }
    let last_slash = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[last_slash..].rfind(':') {
        Some(colon) => {
            let at = last_slash + colon;
            (&reference[..at], Some(&reference[at..]))
        }
        None => (reference, None),
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

pub(crate) fn image(reference: &str) -> SourceOp {
    SourceOp {
        identifier: format!("docker-image://{}", normalize_image_reference(reference)),
        attrs: BTreeMap::new(),
    }
}

pub(crate) fn local(name: &str) -> SourceOp {
    SourceOp {
        identifier: format!("local://{name}"),
        attrs: BTreeMap::new(),
    }
}

pub(crate) fn http(url: &str, options: &HttpOptions) -> SourceOp {
    let mut attrs = BTreeMap::new();
    if let Some(checksum) = &options.checksum {
        let _ = attrs.insert("http.checksum".to_string(), checksum.to_string());
    }
    if let Some(filename) = &options.filename {
        let _ = attrs.insert("http.filename".to_string(), filename.clone());
    }
    if let Some(owner) = options.owner {
        let _ = attrs.insert("http.uid".to_string(), owner.uid.to_string());
        let _ = attrs.insert("http.gid".to_string(), owner.gid.to_string());
    }
    if let Some(mode) = options.mode {
        let _ = attrs.insert("http.perm".to_string(), format!("{mode:o}"));
    }
    SourceOp {
        identifier: url.to_string(),
        attrs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_get_library_prefix() {
        assert_eq!(
            normalize_image_reference("ubuntu:22.04"),
            "docker.io/library/ubuntu:22.04"
        );
        assert_eq!(normalize_image_reference("ubuntu"), "docker.io/library/ubuntu:latest");
    }

    #[test]
    fn organization_images_get_registry_prefix() {
        assert_eq!(
            normalize_image_reference("nvidia/cuda:11.8.0-cudnn8-devel-ubuntu22.04"),
            "docker.io/nvidia/cuda:11.8.0-cudnn8-devel-ubuntu22.04"
        );
    }

    #[test]
    fn explicit_registries_are_kept() {
        assert_eq!(
            normalize_image_reference("localhost:5000/envd/base:dev"),
            "localhost:5000/envd/base:dev"
        );
        assert_eq!(normalize_image_reference("ghcr.io/org/img"), "ghcr.io/org/img:latest");
    }

    #[test]
    fn digests_are_kept() {
        let digest = format!("sha256:{}", "b".repeat(64));
        assert_eq!(
            normalize_image_reference(&format!("ubuntu@{digest}")),
            format!("docker.io/library/ubuntu@{digest}")
        );
    }

    #[test]
    fn http_attrs_carry_options() {
        let op = http(
            "https://example.com/a.tar.gz",
            &HttpOptions::default()
                .filename("a.tar.gz")
                .owner(Identity::new(1000, 1000)),
        );
        assert_eq!(op.attrs.get("http.filename").map(String::as_str), Some("a.tar.gz"));
        assert_eq!(op.attrs.get("http.uid").map(String::as_str), Some("1000"));
    }
}
