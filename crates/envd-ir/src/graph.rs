//! The environment graph and the setters the frontend populates it with.

use std::path::{Path, PathBuf};

use envd_common::constants::{CUDNN_VERSION_DEFAULT, DEFAULT_IMAGE, SYNTAX_VERSION};
use envd_common::error::{EnvdError, Result};
use envd_common::types::{Digest, Identity, Platform};
use serde::{Deserialize, Serialize};

use crate::editor::Plugin;
use crate::language::{Language, LanguageKind, parse_language};
use crate::runtime::{ExposeItem, RuntimeGraph};
use crate::types::{
    CodeAgent, CondaConfig, CopyInfo, GitConfig, HttpInfo, JupyterConfig, MountInfo, PixiConfig,
    RStudioServerConfig, RepoInfo, RunBuildCommand, Shell, UvConfig,
};

/// Everything one environment asks for.
///
/// A graph is created per build, filled in by the frontend, compiled once,
/// and dropped. Package groups keep the order they were added in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Graph {
    pub(crate) languages: Vec<Language>,
    pub(crate) syntax_version: String,
    pub(crate) image: String,
    pub(crate) user: String,
    pub(crate) shell: Shell,
    pub(crate) dev: bool,
    pub(crate) cuda: Option<String>,
    pub(crate) cudnn: String,
    pub(crate) num_gpus: i32,
    pub(crate) shm_size: i32,
    pub(crate) platform: Platform,
    pub(crate) working_dir: Option<String>,

    pub(crate) ubuntu_apt_source: Option<String>,
    pub(crate) cran_mirror_url: Option<String>,
    pub(crate) julia_package_server: Option<String>,
    pub(crate) pypi_index_url: Option<String>,
    pub(crate) pypi_extra_index_url: Option<String>,
    pub(crate) pypi_trust: bool,

    pub(crate) pypi_packages: Vec<Vec<String>>,
    pub(crate) requirements_file: Option<String>,
    pub(crate) python_wheels: Vec<String>,
    pub(crate) r_packages: Vec<Vec<String>>,
    pub(crate) julia_packages: Vec<Vec<String>>,
    pub(crate) system_packages: Vec<String>,

    pub(crate) vscode_plugins: Vec<Plugin>,
    pub(crate) user_directories: Vec<String>,

    pub(crate) exec: Vec<RunBuildCommand>,
    pub(crate) copy: Vec<CopyInfo>,
    pub(crate) mount: Vec<MountInfo>,
    pub(crate) http: Vec<HttpInfo>,
    pub(crate) entrypoint: Vec<String>,
    pub(crate) repo: RepoInfo,

    pub(crate) jupyter: Option<JupyterConfig>,
    pub(crate) git: Option<GitConfig>,
    pub(crate) conda: Option<CondaConfig>,
    pub(crate) uv: Option<UvConfig>,
    pub(crate) pixi: Option<PixiConfig>,
    pub(crate) rstudio_server: Option<RStudioServerConfig>,
    pub(crate) agents: Vec<CodeAgent>,

    pub(crate) runtime: RuntimeGraph,

    pub(crate) owner: Option<Identity>,
    pub(crate) environment_name: String,
    pub(crate) dependency_files: Vec<PathBuf>,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            syntax_version: SYNTAX_VERSION.into(),
            image: DEFAULT_IMAGE.into(),
            user: String::new(),
            shell: Shell::default(),
            dev: false,
            cuda: None,
            cudnn: CUDNN_VERSION_DEFAULT.into(),
            num_gpus: 0,
            shm_size: 0,
            platform: Platform::default(),
            working_dir: None,
            ubuntu_apt_source: None,
            cran_mirror_url: None,
            julia_package_server: None,
            pypi_index_url: None,
            pypi_extra_index_url: None,
            pypi_trust: false,
            pypi_packages: Vec::new(),
            requirements_file: None,
            python_wheels: Vec::new(),
            r_packages: Vec::new(),
            julia_packages: Vec::new(),
            system_packages: Vec::new(),
            vscode_plugins: Vec::new(),
            user_directories: Vec::new(),
            exec: Vec::new(),
            copy: Vec::new(),
            mount: Vec::new(),
            http: Vec::new(),
            entrypoint: Vec::new(),
            repo: RepoInfo::default(),
            jupyter: None,
            git: None,
            conda: None,
            uv: None,
            pixi: None,
            rstudio_server: None,
            agents: Vec::new(),
            runtime: RuntimeGraph::default(),
            owner: None,
            environment_name: String::new(),
            dependency_files: Vec::new(),
        }
    }
}

impl Graph {
    /// Creates an empty graph for a dev environment on the default base image.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dev: true,
            ..Self::default()
        }
    }

    /// Sets the base image and whether it becomes a dev environment.
    pub fn set_base(&mut self, image: impl Into<String>, dev: bool) {
        self.image = image.into();
        self.dev = dev;
    }

    /// Declares a language such as `python3.11`. Redeclaring a language
    /// updates its version in place.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::UnsupportedLanguage`] for unknown languages.
    pub fn add_language(&mut self, value: &str) -> Result<()> {
        let language = parse_language(value)?;
        match self.languages.iter_mut().find(|l| l.kind == language.kind) {
            Some(existing) => *existing = language,
            None => self.languages.push(language),
        }
        Ok(())
    }

    /// Requests a CUDA base image. An empty `cudnn` keeps the default.
    pub fn set_cuda(&mut self, version: impl Into<String>, cudnn: &str) {
        self.cuda = Some(version.into());
        if !cudnn.is_empty() {
            self.cudnn = cudnn.to_string();
        }
    }

    /// Sets the number of GPUs; `-1` means all.
    pub const fn set_gpu(&mut self, num: i32) {
        self.num_gpus = num;
    }

    /// Sets the shared memory size in MB.
    pub const fn set_shm_size(&mut self, size: i32) {
        self.shm_size = size;
    }

    /// Sets the target platform.
    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    /// Sets the working directory for a custom image.
    pub fn set_working_dir(&mut self, dir: impl Into<String>) {
        self.working_dir = Some(dir.into());
    }

    /// Sets the identity owning generated files when no owner flag is given.
    pub const fn set_owner(&mut self, uid: u32, gid: u32) {
        self.owner = Some(Identity::new(uid, gid));
    }

    /// Replaces `/etc/apt/sources.list`.
    pub fn set_apt_source(&mut self, content: impl Into<String>) {
        self.ubuntu_apt_source = Some(content.into());
    }

    /// Sets the CRAN mirror.
    pub fn set_cran_mirror(&mut self, url: impl Into<String>) {
        self.cran_mirror_url = Some(url.into());
    }

    /// Sets `JULIA_PKG_SERVER`.
    pub fn set_julia_package_server(&mut self, url: impl Into<String>) {
        self.julia_package_server = Some(url.into());
    }

    /// Configures the PyPI index.
    pub fn set_pypi_index(&mut self, url: impl Into<String>, extra_url: Option<String>, trust: bool) {
        self.pypi_index_url = Some(url.into());
        self.pypi_extra_index_url = extra_url;
        self.pypi_trust = trust;
    }

    /// Adds one `pip install` group.
    pub fn add_pypi_packages<I, S>(&mut self, group: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_group(&mut self.pypi_packages, group);
    }

    /// Installs a requirements file from the build context.
    pub fn set_requirements_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.record_dependency(&path);
        self.requirements_file = Some(path);
    }

    /// Installs a wheel from the build context.
    pub fn add_python_wheel(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.record_dependency(&path);
        self.python_wheels.push(path);
    }

    /// Adds one R `install.packages` group.
    pub fn add_r_packages<I, S>(&mut self, group: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_group(&mut self.r_packages, group);
    }

    /// Adds one Julia `Pkg.add` group.
    pub fn add_julia_packages<I, S>(&mut self, group: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_group(&mut self.julia_packages, group);
    }

    /// Adds OS packages.
    pub fn add_system_packages<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_packages.extend(names.into_iter().map(Into::into));
    }

    /// Enables conda, or micromamba when `use_micromamba` is set.
    pub fn set_conda(&mut self, use_micromamba: bool) {
        self.conda.get_or_insert_with(CondaConfig::default).use_micromamba = use_micromamba;
    }

    /// Adds conda packages, enabling conda when needed.
    pub fn add_conda_packages<I, S>(&mut self, packages: I, channels: &[String])
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let conda = self.conda.get_or_insert_with(CondaConfig::default);
        conda.packages.extend(packages.into_iter().map(Into::into));
        for channel in channels {
            if !conda.additional_channels.contains(channel) {
                conda.additional_channels.push(channel.clone());
            }
        }
    }

    /// Sets the `.condarc` content.
    pub fn set_conda_channel(&mut self, content: impl Into<String>) {
        self.conda.get_or_insert_with(CondaConfig::default).channel = Some(content.into());
    }

    /// Applies a conda environment file from the build context.
    pub fn set_conda_env_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.record_dependency(&path);
        self.conda.get_or_insert_with(CondaConfig::default).env_file = Some(path);
    }

    /// Installs uv with a managed Python.
    pub fn set_uv(&mut self, python_version: impl Into<String>) {
        self.uv = Some(UvConfig {
            python_version: python_version.into(),
        });
    }

    /// Installs pixi.
    pub fn set_pixi(&mut self, use_pixi_mirror: bool, pypi_index: Option<String>) {
        self.pixi = Some(PixiConfig {
            use_pixi_mirror,
            pypi_index,
        });
    }

    /// Adds a VSCode extension such as `ms-python.python-2021.5.0`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] if the extension name has no publisher.
    pub fn add_vscode_plugin(&mut self, name: &str) -> Result<()> {
        self.vscode_plugins.push(Plugin::parse(name)?);
        Ok(())
    }

    /// Adds a coding agent.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] for unknown agents.
    pub fn add_code_agent(&mut self, name: &str, version: Option<String>) -> Result<()> {
        self.agents.push(CodeAgent::new(name, version)?);
        Ok(())
    }

    /// Sets the interactive shell.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] for unsupported shells.
    pub fn set_shell(&mut self, name: &str) -> Result<()> {
        self.shell = Shell::parse(name)?;
        Ok(())
    }

    /// Writes `~/.gitconfig`.
    pub fn set_git(&mut self, name: impl Into<String>, email: impl Into<String>, editor: impl Into<String>) {
        self.git = Some(GitConfig {
            name: name.into(),
            email: email.into(),
            editor: editor.into(),
        });
    }

    /// Runs a Jupyter notebook service.
    pub fn set_jupyter(&mut self, token: impl Into<String>, port: i64) {
        self.jupyter = Some(JupyterConfig {
            token: token.into(),
            port,
        });
    }

    /// Runs an RStudio server service.
    pub fn set_rstudio_server(&mut self) {
        self.rstudio_server = Some(RStudioServerConfig::default());
    }

    /// Adds a group of build commands.
    pub fn add_run<I, S>(&mut self, commands: I, mount_host: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec.push(RunBuildCommand {
            commands: commands.into_iter().map(Into::into).collect(),
            mount_host,
        });
    }

    /// Copies a path from the build context, or from `image` when given.
    pub fn add_copy(&mut self, source: impl Into<String>, destination: impl Into<String>, image: Option<String>) {
        let source = source.into();
        if image.is_none() {
            self.record_dependency(&source);
        }
        self.copy.push(CopyInfo {
            source,
            destination: destination.into(),
            image,
        });
    }

    /// Mounts a host directory at runtime.
    pub fn add_mount(&mut self, source: impl Into<String>, destination: impl Into<String>) {
        self.mount.push(MountInfo {
            source: source.into(),
            destination: destination.into(),
        });
    }

    /// Downloads a file into the extra-source directory.
    ///
    /// An empty `filename` uses the last URL segment.
    pub fn add_http(&mut self, url: impl Into<String>, checksum: Option<Digest>, filename: &str) {
        let url = url.into();
        let filename = if filename.is_empty() {
            url.rsplit('/').next().unwrap_or_default().to_string()
        } else {
            filename.to_string()
        };
        self.http.push(HttpInfo {
            url,
            checksum,
            filename,
        });
    }

    /// Sets the entrypoint of a custom image.
    pub fn set_entrypoint<I, S>(&mut self, argv: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = argv.into_iter().map(Into::into).collect();
    }

    /// Records the repository the environment comes from.
    pub fn set_repo(&mut self, url: impl Into<String>, description: impl Into<String>) {
        self.repo = RepoInfo {
            url: url.into(),
            description: description.into(),
        };
    }

    /// Adds a named runtime command.
    pub fn add_runtime_command(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.runtime.commands.insert(key.into(), value.into());
    }

    /// Adds a runtime daemon.
    pub fn add_runtime_daemon<I, S>(&mut self, argv: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime.daemon.push(argv.into_iter().map(Into::into).collect());
    }

    /// Adds a script run once at container start.
    pub fn add_runtime_init<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime.init_script.push(commands.into_iter().map(Into::into).collect());
    }

    /// Sets a runtime environment variable.
    pub fn add_runtime_environ(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.runtime.environ.insert(key.into(), value.into());
    }

    /// Appends runtime PATH segments.
    pub fn add_runtime_env_paths<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runtime.append_env_paths(paths);
    }

    /// Publishes a port.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::InvalidPort`] or [`EnvdError::InvalidListenAddress`]
    /// when the item is invalid.
    pub fn add_runtime_expose(
        &mut self,
        envd_port: i64,
        host_port: i64,
        service_name: &str,
        listen_addr: &str,
    ) -> Result<()> {
        self.runtime
            .expose
            .push(ExposeItem::new(envd_port, host_port, service_name, listen_addr)?);
        Ok(())
    }

    fn record_dependency(&mut self, path: &str) {
        let path = PathBuf::from(path);
        if !self.dependency_files.contains(&path) {
            self.dependency_files.push(path);
        }
    }

    /// Host paths the build reads from the build context.
    #[must_use]
    pub fn dependency_files(&self) -> &[PathBuf] {
        &self.dependency_files
    }

    /// Whether a GPU base image is requested.
    #[must_use]
    pub const fn gpu_enabled(&self) -> bool {
        self.cuda.is_some()
    }

    /// Whether this is a dev environment.
    #[must_use]
    pub const fn is_dev(&self) -> bool {
        self.dev
    }

    /// The base image, rewritten for CUDA once compiled.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// The user containers start as, empty for the image default.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The interactive shell.
    #[must_use]
    pub const fn shell(&self) -> Shell {
        self.shell
    }

    /// Requested GPU count.
    #[must_use]
    pub const fn num_gpus(&self) -> i32 {
        self.num_gpus
    }

    /// Requested shared memory size.
    #[must_use]
    pub const fn shm_size(&self) -> i32 {
        self.shm_size
    }

    /// Target platform.
    #[must_use]
    pub const fn platform(&self) -> &Platform {
        &self.platform
    }

    /// The identity configured with [`Graph::set_owner`].
    #[must_use]
    pub const fn owner(&self) -> Option<Identity> {
        self.owner
    }

    /// The environment name set at compile time.
    #[must_use]
    pub fn environment_name(&self) -> &str {
        &self.environment_name
    }

    /// Runtime mounts.
    #[must_use]
    pub fn mounts(&self) -> &[MountInfo] {
        &self.mount
    }

    /// Runtime metadata.
    #[must_use]
    pub const fn runtime(&self) -> &RuntimeGraph {
        &self.runtime
    }

    /// Jupyter settings.
    #[must_use]
    pub const fn jupyter(&self) -> Option<&JupyterConfig> {
        self.jupyter.as_ref()
    }

    /// Whether a language of the given kind is declared.
    #[must_use]
    pub fn has_language(&self, kind: LanguageKind) -> bool {
        self.languages.iter().any(|l| l.kind == kind)
    }

    /// Serializes the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a graph from [`Graph::dump`] output.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid graph.
    pub fn load(code: &str) -> Result<Self> {
        serde_json::from_str(code).map_err(|e| EnvdError::Config {
            message: format!("failed to unmarshal graph: {e}"),
        })
    }

    /// Reads a JSON environment graph from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EnvdError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load(&content)
    }
}

fn push_group<I, S>(groups: &mut Vec<Vec<String>>, group: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let group: Vec<String> = group.into_iter().map(Into::into).collect();
    if !group.is_empty() {
        groups.push(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_graph_is_dev_on_default_image() {
        let graph = Graph::new();
        assert!(graph.is_dev());
        assert_eq!(graph.image(), DEFAULT_IMAGE);
        assert_eq!(graph.cudnn, CUDNN_VERSION_DEFAULT);
    }

    #[test]
    fn package_groups_keep_call_order() {
        let mut graph = Graph::new();
        graph.add_pypi_packages(["numpy", "scipy"]);
        graph.add_pypi_packages(["torch"]);
        graph.add_pypi_packages(Vec::<String>::new());
        assert_eq!(
            graph.pypi_packages,
            vec![vec!["numpy".to_string(), "scipy".into()], vec!["torch".into()]]
        );
    }

    #[test]
    fn redeclared_language_replaces_version_in_place() {
        let mut graph = Graph::new();
        graph.add_language("python3.9").expect("python");
        graph.add_language("r").expect("r");
        graph.add_language("python3.11").expect("python");
        assert_eq!(graph.languages.len(), 2);
        assert_eq!(graph.languages[0].kind, LanguageKind::Python);
        assert_eq!(graph.languages[0].version.as_deref(), Some("3.11"));
        assert_eq!(graph.languages[1].kind, LanguageKind::R);
    }

    #[test]
    fn setters_record_dependency_files() {
        let mut graph = Graph::new();
        graph.set_requirements_file("requirements.txt");
        graph.add_python_wheel("dist/pkg.whl");
        graph.set_conda_env_file("environment.yml");
        graph.add_copy("src", "/home/envd/src", None);
        graph.add_copy("/etc/hosts", "/tmp/hosts", Some("ubuntu:22.04".into()));
        graph.add_copy("src", "/other", None);
        let files: Vec<&str> = graph
            .dependency_files()
            .iter()
            .filter_map(|p| p.to_str())
            .collect();
        assert_eq!(files, vec!["requirements.txt", "dist/pkg.whl", "environment.yml", "src"]);
    }

    #[test]
    fn http_filename_defaults_to_url_basename() {
        let mut graph = Graph::new();
        graph.add_http("https://example.com/data/mnist.tar.gz", None, "");
        assert_eq!(graph.http[0].filename, "mnist.tar.gz");
    }

    #[test]
    fn invalid_expose_is_not_recorded() {
        let mut graph = Graph::new();
        assert!(graph.add_runtime_expose(0, 0, "svc", "127.0.0.1").is_err());
        assert!(graph.runtime().expose.is_empty());
    }

    #[test]
    fn dump_and_load_round_trip() {
        let mut graph = Graph::new();
        graph.add_language("python3.10").expect("python");
        graph.set_cuda("11.8.0", "8");
        graph.add_pypi_packages(["numpy"]);
        graph.set_conda(true);
        graph.set_jupyter("", 8888);
        graph.add_runtime_command("train", "python train.py");
        let code = graph.dump().expect("dump");
        assert_eq!(Graph::load(&code).expect("load"), graph);
    }

    #[test]
    fn load_keeps_defaults_for_missing_fields() {
        let graph = Graph::load(r#"{"dev": true, "system_packages": ["htop"]}"#).expect("load");
        assert_eq!(graph.image(), DEFAULT_IMAGE);
        assert_eq!(graph.system_packages, vec!["htop"]);
        assert!(Graph::load("[]").is_err());
    }
}
