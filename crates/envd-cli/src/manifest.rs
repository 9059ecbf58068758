//! YAML environment manifests.
//!
//! A manifest is a declarative stand-in for the `build.envd` frontend: every
//! section maps onto one or more [`Graph`] setters.
//!
//! ```yaml
//! base:
//!   image: ubuntu:22.04
//! languages: [python3.11]
//! packages:
//!   pypi:
//!     - [numpy, pandas]
//! runtime:
//!   expose:
//!     - envd_port: 6006
//!       service: tensorboard
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use envd_common::constants::DEFAULT_IMAGE;
use envd_common::error::Result;
use envd_common::types::{Digest, Platform};
use envd_ir::{Graph, parse_owner};
use serde::Deserialize;

/// Top-level manifest document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    /// Base image and mode.
    pub base: BaseSection,
    /// Languages such as `python3.11` or `r`.
    pub languages: Vec<String>,
    /// CUDA base image request.
    pub cuda: Option<CudaSection>,
    /// GPU count, `-1` for all.
    pub gpu: Option<i32>,
    /// Shared memory size in MB.
    pub shm_size: Option<i32>,
    /// Target platform as `os/arch`.
    pub platform: Option<String>,
    /// Working dir of a custom image.
    pub working_dir: Option<String>,
    /// Owner as `uid` or `uid:gid`.
    pub owner: Option<String>,
    /// Interactive shell.
    pub shell: Option<String>,
    /// Package mirrors.
    pub mirror: MirrorSection,
    /// Package lists.
    pub packages: PackagesSection,
    /// Conda setup.
    pub conda: Option<CondaSection>,
    /// uv setup.
    pub uv: Option<UvSection>,
    /// pixi setup.
    pub pixi: Option<PixiSection>,
    /// VSCode extensions.
    pub vscode: Vec<String>,
    /// Coding agents.
    pub agents: Vec<AgentSection>,
    /// Git identity.
    pub git: Option<GitSection>,
    /// Jupyter service.
    pub jupyter: Option<JupyterSection>,
    /// RStudio server service.
    pub rstudio_server: bool,
    /// Build commands.
    pub run: Vec<RunSection>,
    /// Copies into the image.
    pub copy: Vec<CopySection>,
    /// Runtime mounts.
    pub mount: Vec<MountSection>,
    /// Downloads into the image.
    pub http: Vec<HttpSection>,
    /// Entrypoint of a custom image.
    pub entrypoint: Vec<String>,
    /// Source repository.
    pub repo: Option<RepoSection>,
    /// Runtime metadata.
    pub runtime: RuntimeSection,
}

/// `base` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseSection {
    /// Base image reference.
    pub image: String,
    /// Whether to add the dev tooling.
    pub dev: bool,
}

impl Default for BaseSection {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            dev: true,
        }
    }
}

/// `cuda` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CudaSection {
    /// CUDA version such as `11.8.0`.
    pub version: String,
    /// CUDNN major version.
    #[serde(default)]
    pub cudnn: String,
}

/// `mirror` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorSection {
    /// Full `/etc/apt/sources.list` content.
    pub apt: Option<String>,
    /// CRAN mirror URL.
    pub cran: Option<String>,
    /// Julia package server URL.
    pub julia: Option<String>,
    /// PyPI index.
    pub pypi: Option<PypiIndexSection>,
}

/// `mirror.pypi` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PypiIndexSection {
    /// Index URL.
    pub url: String,
    /// Extra index URL.
    #[serde(default)]
    pub extra_url: Option<String>,
    /// Mark both hosts as trusted.
    #[serde(default)]
    pub trust: bool,
}

/// `packages` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagesSection {
    /// OS packages.
    pub system: Vec<String>,
    /// PyPI install groups.
    pub pypi: Vec<Vec<String>>,
    /// Requirements file in the build context.
    pub requirements: Option<String>,
    /// Wheels in the build context.
    pub wheels: Vec<String>,
    /// R install groups.
    pub r: Vec<Vec<String>>,
    /// Julia install groups.
    pub julia: Vec<Vec<String>>,
}

/// `conda` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CondaSection {
    /// Use micromamba instead of miniconda.
    pub use_micromamba: bool,
    /// Conda packages.
    pub packages: Vec<String>,
    /// Extra channels passed with `-c`.
    pub channels: Vec<String>,
    /// `.condarc` content.
    pub channel: Option<String>,
    /// Environment file in the build context.
    pub env_file: Option<String>,
}

/// `uv` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UvSection {
    /// Managed Python version.
    pub python_version: String,
}

/// `pixi` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PixiSection {
    /// Use the prefix.dev mirrors.
    pub use_pixi_mirror: bool,
    /// PyPI index URL.
    pub pypi_index: Option<String>,
}

/// One `agents` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    /// Agent name.
    pub name: String,
    /// Pinned version, latest when unset.
    #[serde(default)]
    pub version: Option<String>,
}

/// `git` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitSection {
    /// `user.name`.
    pub name: String,
    /// `user.email`.
    pub email: String,
    /// `core.editor`.
    pub editor: String,
}

/// `jupyter` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JupyterSection {
    /// Notebook token, empty to disable.
    pub token: String,
    /// Host port.
    pub port: i64,
}

impl Default for JupyterSection {
    fn default() -> Self {
        Self {
            token: String::new(),
            port: i64::from(envd_common::constants::JUPYTER_PORT_IN_CONTAINER),
        }
    }
}

/// One `run` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Shell commands run in one layer.
    pub commands: Vec<String>,
    /// Mount the build context at the working dir.
    #[serde(default)]
    pub mount_host: bool,
}

/// One `copy` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySection {
    /// Path in the build context, or in `image`.
    pub source: String,
    /// Path in the environment.
    pub destination: String,
    /// Image to copy from.
    #[serde(default)]
    pub image: Option<String>,
}

/// One `mount` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSection {
    /// Host path.
    pub source: String,
    /// Path in the environment.
    pub destination: String,
}

/// One `http` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    /// File URL.
    pub url: String,
    /// Expected SHA-256 digest.
    #[serde(default)]
    pub checksum: Option<String>,
    /// File name, the last URL segment when empty.
    #[serde(default)]
    pub filename: String,
}

/// `repo` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoSection {
    /// Repository URL.
    pub url: String,
    /// Short description.
    pub description: String,
}

/// `runtime` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSection {
    /// Named commands.
    pub commands: BTreeMap<String, String>,
    /// Daemon argvs.
    pub daemons: Vec<Vec<String>>,
    /// Init scripts.
    pub init: Vec<Vec<String>>,
    /// Extra environment variables.
    pub environ: BTreeMap<String, String>,
    /// Extra PATH segments.
    pub paths: Vec<String>,
    /// Published ports.
    pub expose: Vec<ExposeSection>,
}

/// One `runtime.expose` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposeSection {
    /// Port inside the environment.
    pub envd_port: i64,
    /// Port on the host, `0` to auto-assign.
    #[serde(default)]
    pub host_port: i64,
    /// Service name.
    #[serde(default)]
    pub service: String,
    /// Host address to bind.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

impl Manifest {
    /// Reads a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid manifest.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid manifest {}", path.display()))
    }

    /// Parses a manifest document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid manifest.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Builds the environment graph.
    ///
    /// # Errors
    ///
    /// Returns the first setter error, such as an unsupported language or
    /// an invalid port.
    pub fn into_graph(self) -> Result<Graph> {
        let mut graph = Graph::new();
        graph.set_base(self.base.image, self.base.dev);
        for language in &self.languages {
            graph.add_language(language)?;
        }
        if let Some(cuda) = self.cuda {
            graph.set_cuda(cuda.version, &cuda.cudnn);
        }
        if let Some(gpu) = self.gpu {
            graph.set_gpu(gpu);
        }
        if let Some(size) = self.shm_size {
            graph.set_shm_size(size);
        }
        if let Some(platform) = self.platform {
            graph.set_platform(Platform::parse(&platform)?);
        }
        if let Some(dir) = self.working_dir {
            graph.set_working_dir(dir);
        }
        if let Some(owner) = self.owner {
            let identity = parse_owner(&owner)?;
            graph.set_owner(identity.uid, identity.gid);
        }
        if let Some(shell) = self.shell {
            graph.set_shell(&shell)?;
        }
        apply_mirrors(&mut graph, self.mirror);
        apply_packages(&mut graph, self.packages);
        if let Some(conda) = self.conda {
            graph.set_conda(conda.use_micromamba);
            graph.add_conda_packages(conda.packages, &conda.channels);
            if let Some(channel) = conda.channel {
                graph.set_conda_channel(channel);
            }
            if let Some(file) = conda.env_file {
                graph.set_conda_env_file(file);
            }
        }
        if let Some(uv) = self.uv {
            graph.set_uv(uv.python_version);
        }
        if let Some(pixi) = self.pixi {
            graph.set_pixi(pixi.use_pixi_mirror, pixi.pypi_index);
        }
        for plugin in &self.vscode {
            graph.add_vscode_plugin(plugin)?;
        }
        for agent in self.agents {
            graph.add_code_agent(&agent.name, agent.version)?;
        }
        if let Some(git) = self.git {
            graph.set_git(git.name, git.email, git.editor);
        }
        if let Some(jupyter) = self.jupyter {
            graph.set_jupyter(jupyter.token, jupyter.port);
        }
        if self.rstudio_server {
            graph.set_rstudio_server();
        }
        for run in self.run {
            graph.add_run(run.commands, run.mount_host);
        }
        for copy in self.copy {
            graph.add_copy(copy.source, copy.destination, copy.image);
        }
        for mount in self.mount {
            graph.add_mount(mount.source, mount.destination);
        }
        for http in self.http {
            let checksum = http.checksum.as_deref().map(Digest::parse).transpose()?;
            graph.add_http(http.url, checksum, &http.filename);
        }
        if !self.entrypoint.is_empty() {
            graph.set_entrypoint(self.entrypoint);
        }
        if let Some(repo) = self.repo {
            graph.set_repo(repo.url, repo.description);
        }
        apply_runtime(&mut graph, self.runtime)?;
        Ok(graph)
    }
}

fn apply_mirrors(graph: &mut Graph, mirror: MirrorSection) {
    if let Some(apt) = mirror.apt {
        graph.set_apt_source(apt);
    }
    if let Some(cran) = mirror.cran {
        graph.set_cran_mirror(cran);
    }
    if let Some(julia) = mirror.julia {
        graph.set_julia_package_server(julia);
    }
    if let Some(pypi) = mirror.pypi {
        graph.set_pypi_index(pypi.url, pypi.extra_url, pypi.trust);
    }
}

fn apply_packages(graph: &mut Graph, packages: PackagesSection) {
    graph.add_system_packages(packages.system);
    for group in packages.pypi {
        graph.add_pypi_packages(group);
    }
    if let Some(file) = packages.requirements {
        graph.set_requirements_file(file);
    }
    for wheel in packages.wheels {
        graph.add_python_wheel(wheel);
    }
    for group in packages.r {
        graph.add_r_packages(group);
    }
    for group in packages.julia {
        graph.add_julia_packages(group);
    }
}

fn apply_runtime(graph: &mut Graph, runtime: RuntimeSection) -> Result<()> {
    for (key, value) in runtime.commands {
        graph.add_runtime_command(key, value);
    }
    for daemon in runtime.daemons {
        graph.add_runtime_daemon(daemon);
    }
    for init in runtime.init {
        graph.add_runtime_init(init);
    }
    for (key, value) in runtime.environ {
        graph.add_runtime_environ(key, value);
    }
    graph.add_runtime_env_paths(&runtime.paths);
    for item in runtime.expose {
        graph.add_runtime_expose(item.envd_port, item.host_port, &item.service, &item.listen_addr)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use envd_common::error::EnvdError;
    use envd_common::types::Identity;
    use envd_ir::LanguageKind;

    use super::*;

    #[test]
    fn empty_manifest_is_a_default_dev_environment() {
        let graph = Manifest::parse("{}").expect("parse").into_graph().expect("graph");
        assert!(graph.is_dev());
        assert_eq!(graph.image(), DEFAULT_IMAGE);
    }

    #[test]
    fn sections_reach_the_graph() {
        let manifest = Manifest::parse(
            r"
base:
  image: ubuntu:20.04
languages: [python3.10, r]
owner: '1000:1001'
shell: zsh
packages:
  pypi:
    - [numpy]
  requirements: requirements.txt
copy:
  - source: data
    destination: /data
runtime:
  environ:
    HF_HOME: /data/hf
  expose:
    - envd_port: 6006
      service: tensorboard
",
        )
        .expect("parse");
        let graph = manifest.into_graph().expect("graph");
        assert_eq!(graph.image(), "ubuntu:20.04");
        assert!(graph.has_language(LanguageKind::Python));
        assert!(graph.has_language(LanguageKind::R));
        assert_eq!(graph.owner(), Some(Identity::new(1000, 1001)));
        assert_eq!(graph.shell().name(), "zsh");
        assert_eq!(
            graph.dependency_files(),
            [PathBuf::from("requirements.txt"), PathBuf::from("data")]
        );
        let runtime = graph.runtime();
        assert_eq!(runtime.environ.get("HF_HOME").map(String::as_str), Some("/data/hf"));
        assert_eq!(runtime.expose[0].envd_port, 6006);
        assert_eq!(runtime.expose[0].listen_addr, "127.0.0.1");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Manifest::parse("langauges: [python]").is_err());
    }

    #[test]
    fn unsupported_language_fails() {
        let err = Manifest::parse("languages: [cobol]")
            .expect("parse")
            .into_graph()
            .unwrap_err();
        assert!(matches!(err, EnvdError::UnsupportedLanguage { .. }));
    }

    #[test]
    fn invalid_expose_port_fails() {
        let err = Manifest::parse("runtime:\n  expose:\n    - envd_port: 0\n")
            .expect("parse")
            .into_graph()
            .unwrap_err();
        assert!(matches!(err, EnvdError::InvalidPort { field: "envd_port", .. }));
    }

    #[test]
    fn invalid_checksum_fails() {
        let err = Manifest::parse("http:\n  - url: https://example.com/a.tgz\n    checksum: nope\n")
            .expect("parse")
            .into_graph()
            .unwrap_err();
        assert!(matches!(err, EnvdError::Config { .. }));
    }
}
