//! Conda, Miniconda and micromamba.

use envd_common::constants::{CURL_IMAGE, MICROMAMBA_IMAGE};
use envd_llb::{CopyOptions, FileActions, MkdirOptions, Run, RunMount, State};

use crate::compile::{BUILD_CONTEXT_SOURCE, Compiler};

pub(crate) const CONDA_PREFIX: &str = "/opt/conda";
pub(crate) const CONDA_BIN_DIR: &str = "/opt/conda/bin";
pub(crate) const CONDA_ENV_NAME: &str = "envd";
pub(crate) const CONDA_ENV_PREFIX: &str = "/opt/conda/envs/envd";

const CONDA_VERSION: &str = "py311_23.11.0-2";
const CONDA_PKGS_DIR: &str = "/opt/conda/pkgs";
const CONDARC_PATH: &str = "/opt/conda/.condarc";
const MICROMAMBA_BIN: &str = "/usr/bin/micromamba";

const GET_CONDA_SCRIPT: &str = include_str!("../../assets/get_conda.sh");
const INSTALL_CONDA_SCRIPT: &str = include_str!("../../assets/install_conda.sh");

fn micromamba_activate_shim() -> String {
    format!("#!/bin/sh\neval \"$({MICROMAMBA_BIN} shell hook -s posix)\"\nmicromamba activate \"$@\"\n")
}

impl Compiler<'_> {
    fn use_micromamba(&self) -> bool {
        self.graph.conda.as_ref().is_some_and(|c| c.use_micromamba)
    }

    /// Path of the conda front-end binary.
    pub(crate) fn conda_command_path(&self) -> &'static str {
        if self.use_micromamba() {
            MICROMAMBA_BIN
        } else {
            "/opt/conda/bin/conda"
        }
    }

    /// Command initializing conda in `shell`'s rc file.
    pub(crate) fn conda_init_shell(&self, shell: &str) -> String {
        if self.use_micromamba() {
            format!("{MICROMAMBA_BIN} shell init -s {shell} -p {CONDA_PREFIX}")
        } else {
            format!("{CONDA_BIN_DIR}/conda init {shell}")
        }
    }

    fn conda_pkgs_mount(&self) -> RunMount {
        self.graph.cache_mount(CONDA_PKGS_DIR, "/cache/conda")
    }

    /// Installs the conda front-end chosen by the configuration.
    pub(crate) fn install_conda(&mut self, root: State) -> State {
        let state = if self.use_micromamba() {
            self.install_micromamba(root)
        } else {
            Self::install_miniconda(root)
        };
        self.record_user_directory(&format!("{CONDA_ENV_PREFIX}/conda-meta"));
        state
    }

    fn install_miniconda(root: State) -> State {
        let builder = State::image(CURL_IMAGE)
            .file(
                FileActions::new()
                    .custom_name("[internal] prepare miniconda download")
                    .mkfile("/tmp/get_conda.sh", 0o755, GET_CONDA_SCRIPT, None),
            )
            .run(
                Run::sh("/bin/sh /tmp/get_conda.sh")
                    .env("CONDA_VERSION", CONDA_VERSION)
                    .custom_name(format!("[internal] download miniconda {CONDA_VERSION}")),
            );
        root.file(
            FileActions::new()
                .custom_name("[internal] prepare miniconda installer")
                .copy(&builder, "/tmp/miniconda.sh", "/tmp/miniconda.sh", CopyOptions::default())
                .mkfile("/tmp/install_conda.sh", 0o755, INSTALL_CONDA_SCRIPT, None),
        )
        .run(Run::shell("bash /tmp/install_conda.sh").custom_name("[internal] install miniconda"))
        .file(
            FileActions::new()
                .custom_name("[internal] clean miniconda installer")
                .rm("/tmp/miniconda.sh")
                .rm("/tmp/install_conda.sh"),
        )
    }

    fn install_micromamba(&mut self, root: State) -> State {
        for (key, value) in [("MAMBA_ROOT_PREFIX", CONDA_PREFIX), ("MAMBA_EXE", MICROMAMBA_BIN)] {
            let _ = self.graph.runtime.environ.insert(key.into(), value.into());
        }
        root.file(
            FileActions::new()
                .custom_name("[internal] install micromamba")
                .copy(
                    &State::image(MICROMAMBA_IMAGE),
                    "/bin/micromamba",
                    MICROMAMBA_BIN,
                    CopyOptions::default(),
                )
                .mkdir(CONDA_BIN_DIR, 0o755, MkdirOptions::parents())
                .mkfile(format!("{CONDA_BIN_DIR}/activate"), 0o755, micromamba_activate_shim(), None),
        )
        .with_env("MAMBA_ROOT_PREFIX", CONDA_PREFIX)
        .with_env("MAMBA_EXE", MICROMAMBA_BIN)
        .run(
            Run::shell(format!(
                "update-alternatives --install /usr/bin/conda conda {MICROMAMBA_BIN} 1"
            ))
            .custom_name("[internal] link micromamba to conda"),
        )
    }

    /// Creates the `envd` environment with the requested Python.
    pub(crate) fn compile_conda_environment(&self, root: State, python: &str) -> State {
        let command = if self.use_micromamba() {
            format!(
                "{MICROMAMBA_BIN} create -p {CONDA_ENV_PREFIX} -c conda-forge python={python} pip -y"
            )
        } else {
            format!(
                "{} create -n {CONDA_ENV_NAME} python={python} pip -y",
                self.conda_command_path()
            )
        };
        root.run(
            Run::shell(command)
                .mount(self.conda_pkgs_mount())
                .custom_name(format!("[internal] create conda environment with python {python}")),
        )
    }

    /// Writes the channel file when one is configured.
    pub(crate) fn compile_conda_channel(&self, root: State) -> State {
        let Some(channel) = self.graph.conda.as_ref().and_then(|c| c.channel.as_deref()) else {
            return root;
        };
        tracing::debug!(path = CONDARC_PATH, "set conda channel");
        root.file(
            FileActions::new()
                .custom_name("[internal] setting conda channel")
                .mkdir(CONDA_PREFIX, 0o755, MkdirOptions::parents())
                .mkfile(CONDARC_PATH, 0o644, channel, Some(self.identity)),
        )
    }

    /// Applies the environment file, then installs the declared packages.
    pub(crate) fn compile_conda_packages(&self, root: State) -> State {
        let Some(conda) = &self.graph.conda else {
            return root;
        };
        let mut state = root;
        if let Some(env_file) = &conda.env_file {
            let working_dir = self.working_dir();
            let command = if conda.use_micromamba {
                format!("{MICROMAMBA_BIN} install -p {CONDA_ENV_PREFIX} -f {env_file} -y")
            } else {
                format!(
                    "{} env update -n {CONDA_ENV_NAME} --file {env_file}",
                    self.conda_command_path()
                )
            };
            state = state.run(
                Run::shell(command)
                    .dir(working_dir.as_str())
                    .mount(RunMount::bind(working_dir.as_str(), &State::local(BUILD_CONTEXT_SOURCE)).readonly())
                    .mount(self.conda_pkgs_mount())
                    .custom_name(format!("[internal] update conda environment from {env_file}")),
            );
        }
        if conda.packages.is_empty() {
            return state;
        }
        let mut command = format!("{} install -n {CONDA_ENV_NAME}", self.conda_command_path());
        for channel in &conda.additional_channels {
            command.push_str(" -c ");
            command.push_str(channel);
        }
        command.push(' ');
        command.push_str(&conda.packages.join(" "));
        command.push_str(" -y");
        tracing::debug!(command = %command, "install conda packages");
        state.run(
            Run::shell(command)
                .mount(self.conda_pkgs_mount())
                .custom_name(format!("conda install {}", conda.packages.join(" "))),
        )
    }
}
