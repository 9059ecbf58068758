//! Serializable operation payloads.
//!
//! Inputs are not stored in the payload itself. Mounts and copy actions refer
//! to their source by position in the owning vertex's input list, and input
//! `0` is always the base filesystem.

use std::collections::BTreeMap;

use envd_common::types::Identity;
use serde::{Deserialize, Serialize};

/// One node of the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    /// Produces a filesystem from an image, the build context, or a URL.
    Source(SourceOp),
    /// Runs a command on top of input `0`.
    Exec(ExecOp),
    /// Applies file actions on top of input `0`.
    File(FileOp),
    /// Changes between input `0` (lower) and input `1` (upper).
    Diff,
    /// Layers every input on top of the previous one.
    Merge,
}

/// Source payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOp {
    /// Scheme-prefixed identifier, e.g. `docker-image://docker.io/library/ubuntu:22.04`.
    pub identifier: String,
    /// Source-specific attributes such as `http.checksum`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

/// Process metadata of an exec op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecMeta {
    /// Full argv.
    pub args: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Working directory.
    pub cwd: String,
    /// User the process runs as.
    pub user: String,
}

/// Exec payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOp {
    /// Process metadata.
    pub meta: ExecMeta,
    /// Mounts, the root mount first.
    pub mounts: Vec<Mount>,
}

/// Sharing mode of a cache mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
    /// Concurrent builds use the cache at the same time.
    #[default]
    Shared,
    /// Each concurrent build gets its own copy.
    Private,
    /// Concurrent builds wait for each other.
    Locked,
}

/// What backs a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mount_type", rename_all = "snake_case")]
pub enum MountKind {
    /// A filesystem from one of the op's inputs.
    Bind,
    /// A persistent cache directory shared across builds.
    Cache {
        /// Cache identity.
        id: String,
        /// Concurrency mode.
        sharing: CacheSharing,
    },
    /// An empty in-memory filesystem.
    Tmpfs,
}

/// A mount of an exec op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Position of the mounted input, `None` for scratch or non-bind mounts.
    pub input: Option<usize>,
    /// Mount point inside the process.
    pub dest: String,
    /// Subdirectory of the input to mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Whether writes are rejected.
    pub readonly: bool,
    /// Backing kind.
    #[serde(flatten)]
    pub kind: MountKind,
}

/// File payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOp {
    /// Actions applied in order.
    pub actions: Vec<FileAction>,
}

/// One file action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    /// Creates a directory.
    Mkdir {
        /// Absolute path.
        path: String,
        /// Permission bits.
        mode: u32,
        /// Whether missing parents are created.
        make_parents: bool,
        /// Owner of the created directories.
        owner: Option<Identity>,
    },
    /// Creates or overwrites a file.
    Mkfile {
        /// Absolute path.
        path: String,
        /// Permission bits.
        mode: u32,
        /// File content.
        data: String,
        /// Owner of the file.
        owner: Option<Identity>,
    },
    /// Copies from another input.
    Copy {
        /// Position of the source input.
        input: usize,
        /// Path inside the source.
        src: String,
        /// Absolute destination path.
        dest: String,
        /// Owner of the copied files.
        owner: Option<Identity>,
        /// Permission bits forced on the copied files.
        mode: Option<u32>,
        /// Whether missing destination parents are created.
        create_dest_path: bool,
        /// Whether `src` may contain wildcards.
        allow_wildcard: bool,
        /// Whether a directory source copies its contents rather than itself.
        copy_dir_contents_only: bool,
    },
    /// Removes a path.
    Rm {
        /// Absolute path.
        path: String,
        /// Whether a missing path is ignored.
        allow_not_found: bool,
    },
}

impl FileAction {
    /// Resolves a relative destination against `cwd`.
    pub(crate) fn resolve(&mut self, cwd: &str) {
        let path = match self {
            Self::Mkdir { path, .. }
            | Self::Mkfile { path, .. }
            | Self::Rm { path, .. }
            | Self::Copy { dest: path, .. } => path,
        };
        if !path.starts_with('/') {
            *path = join_path(cwd, path);
        }
    }
}

/// Joins `rel` onto `base`, normalizing a single separator.
#[must_use]
pub fn join_path(base: &str, rel: &str) -> String {
    if rel.starts_with('/') {
        return rel.to_string();
    }
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches("./");
    if rel.is_empty() || rel == "." {
        return if base.is_empty() { "/".into() } else { base.to_string() };
    }
    format!("{base}/{rel}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_relative_and_absolute() {
        assert_eq!(join_path("/home/envd", "work"), "/home/envd/work");
        assert_eq!(join_path("/", "etc"), "/etc");
        assert_eq!(join_path("/home/envd", "/opt"), "/opt");
        assert_eq!(join_path("/home/envd/", "./src"), "/home/envd/src");
        assert_eq!(join_path("/", "."), "/");
    }

    #[test]
    fn op_serializes_with_type_tag() {
        let json = serde_json::to_value(Op::Diff).expect("serialize");
        assert_eq!(json["type"], "diff");
    }

    #[test]
    fn cache_mount_flattens_kind() {
        let mount = Mount {
            input: None,
            dest: "/var/cache/apt".into(),
            selector: None,
            readonly: false,
            kind: MountKind::Cache {
                id: "apt/env-cpu".into(),
                sharing: CacheSharing::Locked,
            },
        };
        let json = serde_json::to_value(&mount).expect("serialize");
        assert_eq!(json["mount_type"], "cache");
        assert_eq!(json["sharing"], "locked");
        let back: Mount = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, mount);
    }

    #[test]
    fn resolve_rewrites_relative_destinations() {
        let mut action = FileAction::Mkdir {
            path: "data".into(),
            mode: 0o755,
            make_parents: true,
            owner: None,
        };
        action.resolve("/home/envd");
        assert!(matches!(action, FileAction::Mkdir { ref path, .. } if path == "/home/envd/data"));
    }
}
