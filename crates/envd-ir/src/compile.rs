//! The compile pipeline from a [`Graph`] to a build [`Definition`].

use std::path::{Path, PathBuf};

use envd_common::constants::{envd_home_dir, root_home_dir};
use envd_common::error::{Result, StageContext};
use envd_common::types::{Identity, Platform, StageCompositionStrategy};
use envd_llb::{Definition, State};

use crate::editor::Plugin;
use crate::graph::Graph;
use crate::types::ImageMetadata;

/// Name of the local source holding the build context.
pub const BUILD_CONTEXT_SOURCE: &str = "context";

/// Name of the local source holding the envd cache dir.
pub const CACHE_DIR_SOURCE: &str = "cache";

/// Collaborators the compiler needs outside the graph.
///
/// Every call blocks. Implementations do their own timeouts; the compiler
/// never retries.
pub trait CompileHost {
    /// Fetches the configuration of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`envd_common::error::EnvdError::ImageMetadataFetchFailed`]
    /// when the registry cannot be queried.
    fn image_metadata(&mut self, image: &str, platform: &Platform) -> Result<ImageMetadata>;

    /// Makes the unpacked extension available in the cache dir.
    ///
    /// Returns `true` when it was already cached.
    ///
    /// # Errors
    ///
    /// Returns [`envd_common::error::EnvdError::ToolDownloadFailed`] on failure.
    fn vscode_plugin(&mut self, plugin: &Plugin) -> Result<bool>;

    /// Makes an `oh-my-zsh` checkout available in the cache dir.
    ///
    /// Returns `true` when it was already cached.
    ///
    /// # Errors
    ///
    /// Returns [`envd_common::error::EnvdError::ToolDownloadFailed`] on failure.
    fn oh_my_zsh(&mut self) -> Result<bool>;

    /// Resolves the tag of the latest stable release of a GitHub repository.
    ///
    /// # Errors
    ///
    /// Returns an error if no release could be resolved.
    fn latest_release(&mut self, owner: &str, repo: &str) -> Result<String>;

    /// Directory exposed to the build as the [`CACHE_DIR_SOURCE`] local source.
    fn cache_dir(&self) -> &Path;
}

/// Per-invocation compile settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Name of the environment, usually the build context's directory name.
    pub environment_name: String,
    /// Public key authorized for SSH into dev environments.
    pub public_key_path: PathBuf,
    /// How independent stages are combined.
    pub strategy: StageCompositionStrategy,
}

/// State shared by all stages of one compile.
pub(crate) struct Compiler<'a> {
    pub(crate) graph: &'a mut Graph,
    pub(crate) identity: Identity,
    pub(crate) strategy: StageCompositionStrategy,
    pub(crate) host: &'a mut dyn CompileHost,
    pub(crate) public_key_path: &'a Path,
}

impl Graph {
    /// Compiles the graph into a build definition.
    ///
    /// `identity` must already be resolved, see
    /// [`crate::owner::resolve_identity`]. It is used unchanged by every stage.
    ///
    /// # Errors
    ///
    /// Returns [`envd_common::error::EnvdError::Stage`] wrapping the first
    /// failing stage. No definition is produced on failure.
    pub fn compile(
        &mut self,
        identity: Identity,
        options: &CompileOptions,
        host: &mut dyn CompileHost,
    ) -> Result<Definition> {
        self.environment_name.clone_from(&options.environment_name);
        tracing::info!(
            environment = %self.environment_name,
            uid = identity.uid,
            gid = identity.gid,
            strategy = ?options.strategy,
            "compile build graph"
        );
        let state = Compiler {
            graph: self,
            identity,
            strategy: options.strategy,
            host,
            public_key_path: &options.public_key_path,
        }
        .compile_state()?;
        state
            .marshal(&self.platform)
            .stage("marshal the build definition")
    }
}

impl Compiler<'_> {
    fn compile_state(&mut self) -> Result<State> {
        self.check_entrypoint().stage("compile entrypoint")?;
        self.graph.prepare_jupyter().stage("prepare jupyter")?;

        let base = self.compile_base_image().stage("get the base image")?;
        let mut root = self.compile_ubuntu_apt(base);

        // stable dev steps come first so their layers stay cached
        if self.graph.dev {
            let dev = self.compile_dev_packages(root);
            let sshd = self.compile_sshd(dev);
            let horust = self.install_horust(sshd);
            let starship = self.compile_starship(horust);
            root = self.compile_user_group(starship);
        }

        let lang = self.compile_language(root).stage("compile language")?;
        let packages = self.compile_language_packages(lang);
        let source = self.compile_extra_source(packages);
        let mut state = self.compile_copy(source);

        // identity dependent steps
        if self.graph.dev {
            let git = self.compile_git(state);
            let user = self.compile_user_own(git);
            let key = self.copy_ssh_key(user).stage("copy ssh key")?;
            let shell = self.compile_shell(key).stage("compile shell")?;
            let prompt = self.compile_prompt(shell);
            let agents = self.compile_code_agents(prompt);
            let entrypoint = self.compile_entrypoint(agents).stage("compile entrypoint")?;
            state = self
                .compile_vscode(entrypoint)
                .stage("compile VSCode extensions")?;
        }

        let run = self.compile_run(state);
        Ok(self.compile_mount_dir(run))
    }

    /// Working directory of the environment inside the image.
    pub(crate) fn working_dir(&self) -> String {
        envd_home_dir(&[&self.graph.environment_name])
    }

    /// Joins a path under the home directory of the user the image runs as.
    pub(crate) fn home_dir(&self, parts: &[&str]) -> String {
        if self.graph.dev {
            envd_home_dir(parts)
        } else {
            root_home_dir(parts)
        }
    }

    /// Records a PATH segment and applies the full PATH to `root`.
    pub(crate) fn update_env_path(&mut self, root: State, path: &str) -> State {
        self.graph.runtime.append_env_paths([path]);
        self.apply_env_path(root)
    }

    /// Applies the recorded PATH to `root`.
    pub(crate) fn apply_env_path(&self, root: State) -> State {
        root.with_env("PATH", self.graph.runtime.path())
    }

    pub(crate) fn record_user_directory(&mut self, dir: &str) {
        if self.graph.dev && !self.graph.user_directories.iter().any(|d| d == dir) {
            self.graph.user_directories.push(dir.to_string());
        }
    }
}
