//! Command execution on top of a state.

use crate::op::{CacheSharing, MountKind};
use crate::state::State;

/// A command to run, with its extra mounts and overrides.
#[derive(Debug, Clone)]
pub struct Run {
    pub(crate) args: Vec<String>,
    pub(crate) custom_name: Option<String>,
    pub(crate) mounts: Vec<RunMount>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) dir: Option<String>,
    pub(crate) user: Option<String>,
}

impl Run {
    /// Runs an explicit argv.
    #[must_use]
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            custom_name: None,
            mounts: Vec::new(),
            env: Vec::new(),
            dir: None,
            user: None,
        }
    }

    /// Runs a script with `bash -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(["bash".to_string(), "-c".to_string(), script.into()])
    }

    /// Runs a script with `sh -c`, for images without bash.
    #[must_use]
    pub fn sh(script: impl Into<String>) -> Self {
        Self::new(["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Runs a pipeline with `sh -c` under `set -euo pipefail`, so a failing
    /// download anywhere in the pipe fails the step.
    #[must_use]
    pub fn strict_sh(script: impl AsRef<str>) -> Self {
        Self::sh(format!("set -euo pipefail\n{}", script.as_ref()))
    }

    /// Sets the progress name shown by the build engine.
    #[must_use]
    pub fn custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    /// Adds a mount.
    #[must_use]
    pub fn mount(mut self, mount: RunMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Sets an environment variable for this command only.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Overrides the working directory for this command only.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Overrides the user for this command only.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Returns the argv.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// An extra mount of a [`Run`].
#[derive(Debug, Clone)]
pub struct RunMount {
    pub(crate) dest: String,
    pub(crate) source: Option<State>,
    pub(crate) selector: Option<String>,
    pub(crate) readonly: bool,
    pub(crate) kind: MountKind,
}

impl RunMount {
    /// Binds `source` at `dest`.
    #[must_use]
    pub fn bind(dest: impl Into<String>, source: &State) -> Self {
        Self {
            dest: dest.into(),
            source: Some(source.clone()),
            selector: None,
            readonly: false,
            kind: MountKind::Bind,
        }
    }

    /// Mounts a persistent cache at `dest`.
    #[must_use]
    pub fn cache(dest: impl Into<String>, id: impl Into<String>, sharing: CacheSharing) -> Self {
        Self {
            dest: dest.into(),
            source: None,
            selector: None,
            readonly: false,
            kind: MountKind::Cache {
                id: id.into(),
                sharing,
            },
        }
    }

    /// Mounts an empty tmpfs at `dest`.
    #[must_use]
    pub fn tmpfs(dest: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            source: None,
            selector: None,
            readonly: false,
            kind: MountKind::Tmpfs,
        }
    }

    /// Seeds the mount from `source`, used for cache mounts needing initial permissions.
    #[must_use]
    pub fn with_source(mut self, source: &State) -> Self {
        self.source = Some(source.clone());
        self
    }

    /// Marks the mount read-only.
    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Mounts only a subdirectory of the source.
    #[must_use]
    pub fn selector(mut self, path: impl Into<String>) -> Self {
        self.selector = Some(path.into());
        self
    }
}
