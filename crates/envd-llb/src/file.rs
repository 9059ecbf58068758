//! File actions applied on top of a state.

use envd_common::types::Identity;

use crate::op::FileAction;
use crate::state::State;

/// Options of a mkdir action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MkdirOptions {
    /// Whether missing parents are created.
    pub make_parents: bool,
    /// Owner of the created directories.
    pub owner: Option<Identity>,
}

impl MkdirOptions {
    /// `mkdir -p` semantics.
    #[must_use]
    pub const fn parents() -> Self {
        Self {
            make_parents: true,
            owner: None,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub const fn owner(mut self, owner: Identity) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Options of a copy action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Owner of the copied files.
    pub owner: Option<Identity>,
    /// Permission bits forced on the copied files.
    pub mode: Option<u32>,
    /// Whether missing destination parents are created.
    pub create_dest_path: bool,
    /// Whether the source may contain wildcards.
    pub allow_wildcard: bool,
    /// Whether a directory source copies its contents rather than itself.
    pub copy_dir_contents_only: bool,
}

impl CopyOptions {
    /// Sets the owner.
    #[must_use]
    pub const fn owner(mut self, owner: Identity) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the permission bits.
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Creates missing destination parents.
    #[must_use]
    pub const fn create_dest_path(mut self) -> Self {
        self.create_dest_path = true;
        self
    }

    /// Allows wildcards in the source.
    #[must_use]
    pub const fn allow_wildcard(mut self) -> Self {
        self.allow_wildcard = true;
        self
    }

    /// Copies directory contents only.
    #[must_use]
    pub const fn contents_only(mut self) -> Self {
        self.copy_dir_contents_only = true;
        self
    }
}

/// An ordered batch of file actions forming a single file op.
#[derive(Debug, Clone, Default)]
pub struct FileActions {
    pub(crate) actions: Vec<FileAction>,
    pub(crate) sources: Vec<State>,
    pub(crate) custom_name: Option<String>,
}

impl FileActions {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress name shown by the build engine.
    #[must_use]
    pub fn custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    /// Creates a directory.
    #[must_use]
    pub fn mkdir(mut self, path: impl Into<String>, mode: u32, options: MkdirOptions) -> Self {
        self.actions.push(FileAction::Mkdir {
            path: path.into(),
            mode,
            make_parents: options.make_parents,
            owner: options.owner,
        });
        self
    }

    /// Creates a file with the given content.
    #[must_use]
    pub fn mkfile(
        mut self,
        path: impl Into<String>,
        mode: u32,
        data: impl Into<String>,
        owner: Option<Identity>,
    ) -> Self {
        self.actions.push(FileAction::Mkfile {
            path: path.into(),
            mode,
            data: data.into(),
            owner,
        });
        self
    }

    /// Copies `src` out of `from` to `dest`.
    #[must_use]
    pub fn copy(
        mut self,
        from: &State,
        src: impl Into<String>,
        dest: impl Into<String>,
        options: CopyOptions,
    ) -> Self {
        let input = self.sources.len() + 1;
        self.sources.push(from.clone());
        self.actions.push(FileAction::Copy {
            input,
            src: src.into(),
            dest: dest.into(),
            owner: options.owner,
            mode: options.mode,
            create_dest_path: options.create_dest_path,
            allow_wildcard: options.allow_wildcard,
            copy_dir_contents_only: options.copy_dir_contents_only,
        });
        self
    }

    /// Removes a path, ignoring it when missing.
    #[must_use]
    pub fn rm(mut self, path: impl Into<String>) -> Self {
        self.actions.push(FileAction::Rm {
            path: path.into(),
            allow_not_found: true,
        });
        self
    }

    /// Returns whether the batch has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_inputs_follow_base_input() {
        let a = State::image("ubuntu:22.04");
        let b = State::local("context");
        let actions = FileActions::new()
            .copy(&a, "/etc/hosts", "/tmp/a", CopyOptions::default())
            .mkdir("/tmp/b", 0o755, MkdirOptions::parents())
            .copy(&b, "file", "/tmp/c", CopyOptions::default().create_dest_path());

        assert_eq!(actions.sources.len(), 2);
        let inputs: Vec<usize> = actions
            .actions
            .iter()
            .filter_map(|a| match a {
                FileAction::Copy { input, .. } => Some(*input),
                _ => None,
            })
            .collect();
        assert_eq!(inputs, vec![1, 2]);
    }

    #[test]
    fn empty_batch_is_reported() {
        assert!(FileActions::new().is_empty());
        assert!(!FileActions::new().rm("/tmp/x").is_empty());
    }
}
