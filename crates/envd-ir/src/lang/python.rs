//! Python interpreters and PyPI packages.

use envd_common::constants::{DEFAULT_CONDA_PATH, MICROMAMBA_IMAGE};
use envd_common::error::{EnvdError, Result};
use envd_llb::{CopyOptions, FileActions, Run, RunMount, State};

use super::conda::CONDA_ENV_PREFIX;
use crate::compile::{BUILD_CONTEXT_SOURCE, Compiler};
use crate::compose::Composer;

const PYTHON_DEFAULT_VERSION: &str = "3.9";
const PIP_CONF_PATH: &str = "/etc/pip.conf";
const PIP_CACHE_DIR: &str = "/root/.cache/pip";

/// Normalizes a requested Python version.
///
/// No version, or a bare `3`, selects the default.
pub(crate) fn python_version(version: Option<&str>) -> Result<String> {
    match version {
        None | Some("" | "3") => Ok(PYTHON_DEFAULT_VERSION.to_string()),
        Some(v) if v.strip_prefix("3.").is_some_and(is_dotted_number) => Ok(v.to_string()),
        Some(v) => Err(EnvdError::Config {
            message: format!("python version {v} is not supported"),
        }),
    }
}

fn is_dotted_number(s: &str) -> bool {
    s.split('.')
        .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Extracts the host of an index URL for `trusted-host`.
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn render_pip_conf(index: &str, extra: Option<&str>, trust: bool) -> String {
    let mut conf = format!("[global]\nindex-url = {index}\n");
    if let Some(extra) = extra {
        conf.push_str(&format!("extra-index-url = {extra}\n"));
    }
    if trust {
        let hosts: Vec<&str> = std::iter::once(index)
            .chain(extra)
            .filter_map(url_host)
            .collect();
        if !hosts.is_empty() {
            conf.push_str(&format!("trusted-host = {}\n", hosts.join(" ")));
        }
    }
    conf.push_str("\n[install]\nsrc = /tmp\n");
    conf
}

impl Compiler<'_> {
    pub(crate) fn install_python(&mut self, root: State, version: Option<&str>) -> Result<State> {
        let version = python_version(version)?;
        let mut state = root;
        for path in DEFAULT_CONDA_PATH {
            state = self.update_env_path(state, path);
        }
        let env = if self.graph.conda.is_some() {
            let conda = self.install_conda(state);
            self.compile_conda_environment(conda, &version)
        } else {
            self.install_standalone_python(state, &version)
        };
        Ok(Self::compile_python_alternatives(env))
    }

    /// Creates the `envd` environment with a throwaway micromamba binary.
    fn install_standalone_python(&self, root: State, version: &str) -> State {
        let pkgs = self.graph.cache_mount("/tmp/micromamba/pkgs", "/cache/micromamba");
        root.file(
            FileActions::new()
                .custom_name("[internal] prepare micromamba")
                .copy(
                    &State::image(MICROMAMBA_IMAGE),
                    "/bin/micromamba",
                    "/tmp/micromamba/micromamba",
                    CopyOptions::default().create_dest_path(),
                ),
        )
        .run(
            Run::shell(format!(
                "/tmp/micromamba/micromamba create -p {CONDA_ENV_PREFIX} -c conda-forge python={version} pip -y"
            ))
            .env("MAMBA_ROOT_PREFIX", "/tmp/micromamba")
            .mount(pkgs)
            .custom_name(format!("[internal] install python {version}")),
        )
        .file(
            FileActions::new()
                .custom_name("[internal] clean micromamba")
                .rm("/tmp/micromamba"),
        )
    }

    fn compile_python_alternatives(root: State) -> State {
        let command = ["python", "python3", "pip", "pip3"]
            .iter()
            .map(|bin| format!("update-alternatives --install /usr/bin/{bin} {bin} {CONDA_ENV_PREFIX}/bin/{bin} 1"))
            .collect::<Vec<_>>()
            .join(" && ");
        root.run(Run::shell(command).custom_name("[internal] update python alternatives"))
    }

    /// Installs PyPI and conda packages as two branches of the same parent.
    pub(crate) fn compile_python_packages(&self, root: State) -> State {
        let indexed = self.compile_pypi_index(root);
        if self.graph.conda.is_none() {
            return self.compile_pypi_packages(indexed);
        }
        let mut composer = Composer::new(self.strategy, indexed, "[internal] python packages");
        let pypi = self.compile_pypi_packages(composer.input().clone());
        composer.push(pypi);
        let conda = self.compile_conda_packages(self.compile_conda_channel(composer.input().clone()));
        composer.push(conda);
        composer.finish()
    }

    fn compile_pypi_index(&self, root: State) -> State {
        let Some(index) = self.graph.pypi_index_url.as_deref() else {
            return root;
        };
        let conf = render_pip_conf(
            index,
            self.graph.pypi_extra_index_url.as_deref(),
            self.graph.pypi_trust,
        );
        tracing::debug!(index, trust = self.graph.pypi_trust, "set pypi index");
        root.file(
            FileActions::new()
                .custom_name(format!("[internal] setting pip index to {index}"))
                .mkfile(PIP_CONF_PATH, 0o644, conf, Some(self.identity)),
        )
    }

    fn pip_run(&self, command: String) -> Run {
        let shell = format!("{CONDA_ENV_PREFIX}/bin/python -m {command}");
        Run::shell(shell).mount(self.graph.cache_mount(PIP_CACHE_DIR, "/cache/pip"))
    }

    fn compile_pypi_packages(&self, root: State) -> State {
        let mut state = root;
        for group in &self.graph.pypi_packages {
            if group.is_empty() {
                continue;
            }
            let command = format!("pip install {}", group.join(" "));
            tracing::debug!(command = %command, "install pypi packages");
            state = state.run(self.pip_run(command.clone()).custom_name(format!("[internal] {command}")));
        }

        let context = State::local(BUILD_CONTEXT_SOURCE);
        let working_dir = self.working_dir();
        if let Some(requirements) = &self.graph.requirements_file {
            let command = format!("pip install -r {requirements}");
            state = state.run(
                self.pip_run(command.clone())
                    .dir(working_dir.as_str())
                    .mount(RunMount::bind(working_dir.as_str(), &context).readonly())
                    .custom_name(format!("[internal] {command}")),
            );
        }
        for wheel in &self.graph.python_wheels {
            let command = format!("pip install {wheel}");
            state = state.run(
                self.pip_run(command.clone())
                    .dir(working_dir.as_str())
                    .mount(RunMount::bind(working_dir.as_str(), &context).readonly())
                    .custom_name(format!("[internal] {command}")),
            );
        }
        state
    }
}
