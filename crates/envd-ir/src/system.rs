//! OS packages, build-context files and the steps that run user commands.

use envd_common::constants::{
    BASE_APT_PACKAGES, BASE_ENVIRONMENT, CONTAINER_AUTHORIZED_KEYS_PATH, SSHD_BINARY_PATH,
    SSHD_IMAGE, envd_home_dir,
};
use envd_common::error::{EnvdError, Result};
use envd_llb::{CopyOptions, FileActions, HttpOptions, MkdirOptions, Run, RunMount, State};

use crate::compile::{BUILD_CONTEXT_SOURCE, Compiler};

const APT_CACHE_DIR: &str = "/var/cache/apt";
const APT_LIB_DIR: &str = "/var/lib/apt";

impl Compiler<'_> {
    pub(crate) fn compile_dev_packages(&self, root: State) -> State {
        let mut root = root;
        for (key, value) in BASE_ENVIRONMENT {
            root = root.with_env(*key, *value);
        }
        let script = format!(
            "apt-get update && apt-get install -y apt-utils && \
             apt-get install -y --no-install-recommends --no-install-suggests --fix-missing {} \
             && rm -rf /var/lib/apt/lists/* && locale-gen en_US.UTF-8",
            BASE_APT_PACKAGES.join(" ")
        );
        root.run(Run::shell(script).custom_name("[internal] install built-in packages"))
    }

    pub(crate) fn compile_sshd(&self, root: State) -> State {
        root.file(
            FileActions::new()
                .custom_name(format!("[internal] add envd-sshd from {SSHD_IMAGE}"))
                .copy(
                    &State::image(SSHD_IMAGE),
                    "/usr/bin/envd-sshd",
                    SSHD_BINARY_PATH,
                    CopyOptions::default().create_dest_path(),
                ),
        )
    }

    /// Installs the system packages as one branch on top of `root`.
    pub(crate) fn compile_system_packages(&self, root: &State) -> Option<State> {
        let packages = &self.graph.system_packages;
        if packages.is_empty() {
            tracing::debug!("skip the apt since system package is not specified");
            return None;
        }
        let command = format!(
            "apt-get update && apt-get install -y --no-install-recommends {}",
            packages.join(" ")
        );
        let run = Run::shell(command)
            .custom_name(format!("apt-get install {}", packages.join(" ")))
            .mount(RunMount::cache(
                APT_CACHE_DIR,
                self.graph.cache_id(APT_CACHE_DIR),
                envd_llb::CacheSharing::Shared,
            ))
            .mount(RunMount::cache(
                APT_LIB_DIR,
                self.graph.cache_id(APT_LIB_DIR),
                envd_llb::CacheSharing::Shared,
            ));
        Some(root.run(run))
    }

    /// Layers every HTTP download into the extra-source directory.
    pub(crate) fn compile_extra_source(&self, root: State) -> State {
        if self.graph.http.is_empty() {
            return root;
        }
        let dir = envd_home_dir(&["extra_source"]);
        let mut inputs = Vec::with_capacity(self.graph.http.len() + 1);
        for http in &self.graph.http {
            let mut options = HttpOptions::default()
                .filename(http.filename.as_str())
                .owner(self.identity);
            if let Some(checksum) = &http.checksum {
                options = options.checksum(checksum.clone());
            }
            let source = State::http(&http.url, &options);
            inputs.push(State::scratch().file(
                FileActions::new()
                    .custom_name(format!("[internal] download {}", http.url))
                    .copy(&source, "/", dir.as_str(), CopyOptions::default().create_dest_path()),
            ));
        }
        inputs.push(root);
        State::merge(&inputs)
    }

    pub(crate) fn compile_copy(&self, root: State) -> State {
        let context = State::local(BUILD_CONTEXT_SOURCE);
        self.graph.copy.iter().fold(root, |state, copy| {
            let from = copy.image.as_deref().map_or_else(|| context.clone(), State::image);
            state.file(
                FileActions::new()
                    .custom_name(format!("copy {} to {}", copy.source, copy.destination))
                    .copy(
                        &from,
                        copy.source.as_str(),
                        copy.destination.as_str(),
                        CopyOptions::default()
                            .owner(self.identity)
                            .create_dest_path()
                            .allow_wildcard(),
                    ),
            )
        })
    }

    pub(crate) fn copy_ssh_key(&self, root: State) -> Result<State> {
        let path = self.public_key_path;
        let key = std::fs::read_to_string(path).map_err(|e| EnvdError::MissingPublicKey {
            path: path.to_path_buf(),
            source: e,
        })?;
        let key = key.trim_end_matches('\n');
        tracing::debug!(path = %path.display(), "install ssh public key");
        Ok(root.file(
            FileActions::new()
                .custom_name("[internal] install ssh keys")
                .mkdir("/var/envd", 0o755, MkdirOptions::parents().owner(self.identity))
                .mkfile(
                    CONTAINER_AUTHORIZED_KEYS_PATH,
                    0o644,
                    format!("{key} envd"),
                    Some(self.identity),
                ),
        ))
    }

    /// Runs each declared command group in the working directory.
    pub(crate) fn compile_run(&self, root: State) -> State {
        if self.graph.exec.is_empty() {
            return root;
        }
        let working_dir = self.working_dir();
        let context = State::local(BUILD_CONTEXT_SOURCE);
        let root = root.with_dir(&working_dir);
        self.graph.exec.iter().fold(root, |state, group| {
            let mut script = String::from("set -euo pipefail\n");
            for command in &group.commands {
                script.push_str(command);
                script.push('\n');
            }
            tracing::debug!(command = %script, "compile run command");
            let mut run = Run::new(["/usr/bin/bash".to_string(), "-c".to_string(), script]);
            if group.mount_host {
                run = run.mount(RunMount::bind(working_dir.as_str(), &context));
            }
            state.run(run)
        })
    }

    /// Creates the working directory and every runtime mount point.
    pub(crate) fn compile_mount_dir(&self, root: State) -> State {
        let mut actions = FileActions::new().custom_name("[internal] create mount dirs");
        if self.graph.dev {
            actions = actions.mkdir(
                self.working_dir(),
                0o755,
                MkdirOptions::parents().owner(self.identity),
            );
        }
        for mount in &self.graph.mount {
            actions = actions.mkdir(
                mount.destination.as_str(),
                0o755,
                MkdirOptions::parents().owner(self.identity),
            );
        }
        if actions.is_empty() {
            root
        } else {
            root.file(actions)
        }
    }
}
