//! Value types recorded on the environment graph.

use std::fmt;

use envd_common::error::{EnvdError, Result};
use envd_common::types::Digest;
use serde::{Deserialize, Serialize};

/// Interactive shell of a dev environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// GNU bash.
    #[default]
    Bash,
    /// Z shell with oh-my-zsh.
    Zsh,
    /// fish, installed from its static release.
    Fish,
}

impl Shell {
    /// Parses a shell name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] for anything but `bash`, `zsh`, or `fish`.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "bash" => Ok(Self::Bash),
            "zsh" => Ok(Self::Zsh),
            "fish" => Ok(Self::Fish),
            other => Err(EnvdError::Config {
                message: format!("shell {other} is not supported"),
            }),
        }
    }

    /// Returns the shell name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
        }
    }

    /// Returns the absolute path of the shell binary.
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Bash => "/usr/bin/bash",
            Self::Zsh => "/usr/bin/zsh",
            Self::Fish => "/usr/bin/fish",
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conda or micromamba settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondaConfig {
    /// Packages installed into the `envd` environment.
    pub packages: Vec<String>,
    /// Channels passed with `-c`.
    pub additional_channels: Vec<String>,
    /// Raw `.condarc` content.
    pub channel: Option<String>,
    /// Environment file applied with `update`, relative to the build context.
    pub env_file: Option<String>,
    /// Use micromamba instead of Miniconda.
    pub use_micromamba: bool,
}

/// uv settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UvConfig {
    /// Managed Python installed with `uv python install`.
    pub python_version: String,
}

/// pixi settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixiConfig {
    /// Route conda channels through prefix.dev.
    pub use_pixi_mirror: bool,
    /// PyPI index for pixi's PyPI resolver.
    pub pypi_index: Option<String>,
}

/// Git identity written to `~/.gitconfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    /// `user.name`.
    pub name: String,
    /// `user.email`.
    pub email: String,
    /// `core.editor`.
    pub editor: String,
}

/// Jupyter notebook service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JupyterConfig {
    /// Access token, empty for none.
    pub token: String,
    /// Host port the notebook is published on.
    pub port: i64,
}

/// RStudio server service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RStudioServerConfig {}

/// A group of commands executed in one build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunBuildCommand {
    /// Shell lines, run under `set -euo pipefail`.
    pub commands: Vec<String>,
    /// Mount the build context at the working directory.
    pub mount_host: bool,
}

/// A file or directory copied into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyInfo {
    /// Path inside the build context, or inside `image` when set.
    pub source: String,
    /// Path inside the image.
    pub destination: String,
    /// Copy from this image instead of the build context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A host directory mounted at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    /// Host path.
    pub source: String,
    /// Mount point inside the container.
    pub destination: String,
}

/// A file downloaded into the extra-source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInfo {
    /// Download URL.
    pub url: String,
    /// Expected digest.
    pub checksum: Option<Digest>,
    /// Target filename.
    pub filename: String,
}

/// Source repository of the environment, recorded in labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoInfo {
    /// Repository URL.
    pub url: String,
    /// Free-form description.
    pub description: String,
}

/// Coding agent installable into a dev image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// OpenAI codex CLI.
    Codex,
}

/// A coding agent with an optional pinned version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeAgent {
    /// Which agent.
    pub kind: AgentKind,
    /// Pinned version, latest release when `None`.
    pub version: Option<String>,
}

impl CodeAgent {
    /// Parses an agent name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] for unknown agents.
    pub fn new(name: &str, version: Option<String>) -> Result<Self> {
        let kind = match name {
            "codex" => AgentKind::Codex,
            other => {
                return Err(EnvdError::Config {
                    message: format!("code agent {other} is not supported"),
                });
            }
        };
        Ok(Self { kind, version })
    }
}

/// Configuration inherited from the base image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Entrypoint argv.
    pub entrypoint: Vec<String>,
    /// Default user.
    pub user: Option<String>,
    /// Default working directory.
    pub working_dir: Option<String>,
}

impl ImageMetadata {
    /// Splits the environment into key/value pairs. Values may contain `=`.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .map(|entry| entry.split_once('=').unwrap_or((entry.as_str(), "")))
    }
}
