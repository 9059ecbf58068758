//! Unified error types for the envd workspace.
//!
//! Every failure in the compile pipeline is one of these variants. Stage
//! orchestration wraps the first failing sub-step in [`EnvdError::Stage`]
//! so the caller sees which step produced it.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum EnvdError {
    /// A language name is not one of the supported installers.
    #[error("language {name} is not supported")]
    UnsupportedLanguage {
        /// The name as written in the environment definition.
        name: String,
    },

    /// The owner flag is not `uid` or `uid:gid`.
    #[error("wrong format for owner (uid:gid): {value}")]
    InvalidOwnerFormat {
        /// The rejected owner string.
        value: String,
    },

    /// The SSH public key file could not be read.
    #[error("cannot read public SSH key at {path}: {source}")]
    MissingPublicKey {
        /// Path of the expected public key.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Two options were set that cannot be combined.
    #[error("mutually exclusive configuration: {message}")]
    MutuallyExclusiveConfig {
        /// Which options collided.
        message: String,
    },

    /// A port is outside the permitted range.
    #[error("invalid {field} {port}: must be in [{min}, 65535]")]
    InvalidPort {
        /// Which port field was rejected.
        field: &'static str,
        /// The rejected value.
        port: i64,
        /// Lowest permitted value for this field.
        min: i64,
    },

    /// A listen address is not a valid IP address.
    #[error("invalid listen address: {addr}")]
    InvalidListenAddress {
        /// The rejected address.
        addr: String,
    },

    /// The base image configuration could not be fetched from its registry.
    #[error("failed to get the image metadata for {image}: {reason}")]
    ImageMetadataFetchFailed {
        /// Image reference that was queried.
        image: String,
        /// Description of the failure.
        reason: String,
    },

    /// A toolchain, plugin, or framework download failed.
    #[error("failed to download {tool}: {reason}")]
    ToolDownloadFailed {
        /// What was being downloaded.
        tool: String,
        /// Description of the failure.
        reason: String,
    },

    /// A generated file could not be rendered.
    #[error("failed to render {name}: {reason}")]
    TemplateRenderFailed {
        /// Name of the rendered artifact.
        name: String,
        /// Description of the failure.
        reason: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A compile stage failed.
    #[error("failed to {stage}: {source}")]
    Stage {
        /// Name of the failing stage.
        stage: &'static str,
        /// The error raised inside the stage.
        source: Box<EnvdError>,
    },
}

impl EnvdError {
    /// Returns the innermost error, unwrapping any stage layers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns the names of the wrapping stages, outermost first.
    #[must_use]
    pub fn stages(&self) -> Vec<&'static str> {
        let mut stages = Vec::new();
        let mut current = self;
        while let Self::Stage { stage, source } = current {
            stages.push(*stage);
            current = source;
        }
        stages
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EnvdError>;

/// Attaches a stage name to the error of a [`Result`].
pub trait StageContext<T> {
    /// Wraps an error in [`EnvdError::Stage`] with the given stage name.
    ///
    /// # Errors
    ///
    /// Returns the wrapped error if `self` is an error.
    fn stage(self, stage: &'static str) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: &'static str) -> Result<T> {
        self.map_err(|e| EnvdError::Stage {
            stage,
            source: Box::new(e),
        })
    }
}
