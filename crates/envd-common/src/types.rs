//! Domain primitive types used across the envd workspace.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{EnvdError, Result};

/// SHA-256 digest used for op identity and download verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Computes the digest of a byte slice.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(data)))
    }

    /// Parses a `sha256:<hex>` or bare 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid SHA-256 hex string.
    pub fn parse(value: &str) -> Result<Self> {
        let hex = value.strip_prefix("sha256:").unwrap_or(value);
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EnvdError::Config {
                message: format!("invalid SHA-256 digest: {value}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = EnvdError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

/// Target platform of the build definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture in OCI notation, e.g. `amd64`.
    pub architecture: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self::linux_amd64()
    }
}

impl Platform {
    /// The `linux/amd64` platform.
    #[must_use]
    pub fn linux_amd64() -> Self {
        Self {
            os: "linux".into(),
            architecture: "amd64".into(),
        }
    }

    /// Parses `os/arch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has no `/` separator.
    pub fn parse(value: &str) -> Result<Self> {
        let (os, architecture) = value.split_once('/').ok_or_else(|| EnvdError::Config {
            message: format!("invalid platform {value}, expected os/arch"),
        })?;
        Ok(Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Owning identity of generated files inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User ID.
    pub uid: u32,
    /// Group ID.
    pub gid: u32,
}

impl Identity {
    /// Creates an identity from a uid and gid.
    #[must_use]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Returns whether the identity is root.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.uid == 0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// How independent build branches are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCompositionStrategy {
    /// Diff each branch against the common parent and merge the diffs once.
    #[default]
    Merge,
    /// Apply branches one after another on a running state.
    Sequential,
}

impl StageCompositionStrategy {
    /// Selects the strategy from the builder's `disable merge op` switch.
    #[must_use]
    pub const fn from_disable_merge_op(disable: bool) -> Self {
        if disable { Self::Sequential } else { Self::Merge }
    }
}

/// VSCode extension marketplace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketplaceVendor {
    /// `open-vsx.org`.
    #[default]
    OpenVsx,
    /// Microsoft's gallery.
    VsCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_is_stable() {
        let a = Digest::of(b"envd");
        let b = Digest::of(b"envd");
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), 64);
        assert_ne!(a, Digest::of(b"other"));
    }

    #[test]
    fn digest_parse_accepts_prefixed_and_bare() {
        let hex = "a".repeat(64);
        let bare = Digest::parse(&hex).expect("bare");
        let prefixed = Digest::parse(&format!("sha256:{hex}")).expect("prefixed");
        assert_eq!(bare, prefixed);
        assert_eq!(bare.to_string(), format!("sha256:{hex}"));
    }

    #[test]
    fn digest_parse_rejects_short_input() {
        assert!(Digest::parse("sha256:abc").is_err());
    }

    #[test]
    fn digest_serializes_with_prefix() {
        let digest = Digest::of(b"x");
        let json = serde_json::to_string(&digest).expect("serialize");
        assert!(json.contains("sha256:"));
        let back: Digest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, digest);
    }

    #[test]
    fn platform_parse_and_display() {
        let platform = Platform::parse("linux/arm64").expect("parse");
        assert_eq!(platform.architecture, "arm64");
        assert_eq!(platform.to_string(), "linux/arm64");
        assert!(Platform::parse("linux").is_err());
    }

    #[test]
    fn strategy_follows_disable_flag() {
        assert_eq!(
            StageCompositionStrategy::from_disable_merge_op(true),
            StageCompositionStrategy::Sequential
        );
        assert_eq!(
            StageCompositionStrategy::from_disable_merge_op(false),
            StageCompositionStrategy::Merge
        );
    }

    #[test]
    fn identity_root_detection() {
        assert!(Identity::new(0, 0).is_root());
        assert!(!Identity::new(1000, 1000).is_root());
        assert_eq!(Identity::new(1000, 2000).to_string(), "1000:2000");
    }
}
