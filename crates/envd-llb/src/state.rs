//! Immutable build states.

use std::sync::Arc;

use envd_common::error::Result;
use envd_common::types::Platform;

use crate::definition::Definition;
use crate::exec::Run;
use crate::file::FileActions;
use crate::op::{ExecMeta, ExecOp, FileOp, Mount, MountKind, Op, join_path};
use crate::source::{self, HttpOptions};

/// A node of the build DAG with its inputs.
#[derive(Debug)]
pub(crate) struct Vertex {
    pub(crate) op: Op,
    pub(crate) inputs: Vec<Option<Arc<Vertex>>>,
    pub(crate) custom_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Meta {
    env: Vec<(String, String)>,
    dir: String,
    user: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            dir: "/".into(),
            user: "root".into(),
        }
    }
}

/// A filesystem snapshot plus the process metadata later commands inherit.
///
/// Cloning is cheap: the DAG is shared behind reference counts.
#[derive(Debug, Clone, Default)]
pub struct State {
    output: Option<Arc<Vertex>>,
    meta: Meta,
}

impl State {
    /// The empty filesystem.
    #[must_use]
    pub fn scratch() -> Self {
        Self::default()
    }

    /// A container image.
    #[must_use]
    pub fn image(reference: &str) -> Self {
        Self::from_op(Op::Source(source::image(reference)), Vec::new(), None)
    }

    /// A directory supplied by the client, such as the build context.
    #[must_use]
    pub fn local(name: &str) -> Self {
        Self::from_op(Op::Source(source::local(name)), Vec::new(), None)
    }

    /// A single downloaded file.
    #[must_use]
    pub fn http(url: &str, options: &HttpOptions) -> Self {
        Self::from_op(Op::Source(source::http(url, options)), Vec::new(), None)
    }

    fn from_op(op: Op, inputs: Vec<Option<Arc<Vertex>>>, custom_name: Option<String>) -> Self {
        Self {
            output: Some(Arc::new(Vertex {
                op,
                inputs,
                custom_name,
            })),
            meta: Meta::default(),
        }
    }

    fn derive(&self, op: Op, inputs: Vec<Option<Arc<Vertex>>>, custom_name: Option<String>) -> Self {
        Self {
            meta: self.meta.clone(),
            ..Self::from_op(op, inputs, custom_name)
        }
    }

    /// Returns whether this is the empty filesystem.
    #[must_use]
    pub const fn is_scratch(&self) -> bool {
        self.output.is_none()
    }

    /// Runs a command and returns the resulting root filesystem.
    #[must_use]
    pub fn run(&self, run: Run) -> Self {
        let mut inputs = vec![self.output.clone()];
        let mut mounts = vec![Mount {
            input: Some(0),
            dest: "/".into(),
            selector: None,
            readonly: false,
            kind: MountKind::Bind,
        }];
        for mount in run.mounts {
            let input = mount.source.map(|source| {
                inputs.push(source.output);
                inputs.len() - 1
            });
            mounts.push(Mount {
                input,
                dest: mount.dest,
                selector: mount.selector,
                readonly: mount.readonly,
                kind: mount.kind,
            });
        }

        let mut env = self.meta.env.clone();
        for (key, value) in run.env {
            upsert(&mut env, key, value);
        }
        let cwd = run
            .dir
            .map_or_else(|| self.meta.dir.clone(), |dir| join_path(&self.meta.dir, &dir));
        let meta = ExecMeta {
            args: run.args,
            env: env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            cwd,
            user: run.user.unwrap_or_else(|| self.meta.user.clone()),
        };
        self.derive(Op::Exec(ExecOp { meta, mounts }), inputs, run.custom_name)
    }

    /// Applies a batch of file actions.
    #[must_use]
    pub fn file(&self, actions: FileActions) -> Self {
        let FileActions {
            actions,
            sources,
            custom_name,
        } = actions;
        let mut inputs = vec![self.output.clone()];
        inputs.extend(sources.into_iter().map(|s| s.output));
        let actions = actions
            .into_iter()
            .map(|mut action| {
                action.resolve(&self.meta.dir);
                action
            })
            .collect();
        self.derive(Op::File(FileOp { actions }), inputs, custom_name)
    }

    /// The changes that turn `lower` into `upper`.
    ///
    /// The result keeps the metadata of `upper`.
    #[must_use]
    pub fn diff(lower: &Self, upper: &Self) -> Self {
        upper.derive(
            Op::Diff,
            vec![lower.output.clone(), upper.output.clone()],
            None,
        )
    }

    /// Layers `states` in order.
    ///
    /// The result keeps the working dir and user of the first state. Its
    /// environment is the union of all inputs, later states overriding
    /// earlier values. Merging nothing yields scratch and merging one state
    /// returns it unchanged.
    #[must_use]
    pub fn merge(states: &[Self]) -> Self {
        match states {
            [] => Self::scratch(),
            [single] => single.clone(),
            [first, rest @ ..] => {
                let mut merged = first.derive(
                    Op::Merge,
                    states.iter().map(|s| s.output.clone()).collect(),
                    None,
                );
                for state in rest {
                    for (key, value) in &state.meta.env {
                        upsert(&mut merged.meta.env, key.clone(), value.clone());
                    }
                }
                merged
            }
        }
    }

    /// Sets an environment variable, replacing an earlier value in place.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.meta.env, key.into(), value.into());
        self
    }

    /// Looks up an environment variable.
    #[must_use]
    pub fn env(&self, key: &str) -> Option<&str> {
        self.meta
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns all environment variables in insertion order.
    #[must_use]
    pub fn envs(&self) -> &[(String, String)] {
        &self.meta.env
    }

    /// Sets the working directory. Relative paths resolve against the current one.
    #[must_use]
    pub fn with_dir(mut self, dir: &str) -> Self {
        self.meta.dir = join_path(&self.meta.dir, dir);
        self
    }

    /// Returns the working directory.
    #[must_use]
    pub fn dir(&self) -> &str {
        &self.meta.dir
    }

    /// Sets the user later commands run as.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.meta.user = user.into();
        self
    }

    /// Returns the user later commands run as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.meta.user
    }

    /// Serializes the DAG reachable from this state.
    ///
    /// # Errors
    ///
    /// Returns an error if an op cannot be serialized.
    pub fn marshal(&self, platform: &Platform) -> Result<Definition> {
        Definition::from_head(self.output.as_ref(), platform)
    }
}

fn upsert(env: &mut Vec<(String, String)>, key: String, value: String) {
    match env.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => env.push((key, value)),
    }
}
