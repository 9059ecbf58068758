//! System-wide constants, well-known paths, and image label keys.

/// Application name used in labels and cache paths.
pub const APP_NAME: &str = "envd";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "envd";

/// Syntax version recorded in image labels.
pub const SYNTAX_VERSION: &str = "v1";

/// Name of the unprivileged account created in dev images.
pub const ENVD_USER: &str = "envd";

/// Base image used when the environment does not declare one.
pub const DEFAULT_IMAGE: &str = "ubuntu:22.04";

/// CUDNN major version used when only CUDA is requested.
pub const CUDNN_VERSION_DEFAULT: &str = "8";

/// Image holding the envd SSH daemon binary.
pub const SSHD_IMAGE: &str = concat!(
    "tensorchord/envd-sshd-from-scratch:v",
    env!("CARGO_PKG_VERSION")
);

/// Image holding the horust process supervisor.
pub const HORUST_IMAGE: &str = "tensorchord/horust:v0.1.0";

/// Small image with `curl`, `wget` and `tar` used to fetch artifacts in a side stage.
pub const CURL_IMAGE: &str = "curlimages/curl:8.5.0";

/// Image from which the micromamba binary and CA bundle are copied.
pub const MICROMAMBA_IMAGE: &str = "mambaorg/micromamba:1.0.0";

/// SSH daemon port inside the container.
pub const SSH_PORT_IN_CONTAINER: u16 = 2222;

/// Jupyter notebook port inside the container.
pub const JUPYTER_PORT_IN_CONTAINER: u16 = 8888;

/// RStudio server port inside the container.
pub const RSTUDIO_SERVER_PORT_IN_CONTAINER: u16 = 8787;

/// Location of the authorized keys file read by the SSH daemon.
pub const CONTAINER_AUTHORIZED_KEYS_PATH: &str = "/var/envd/authorized_keys";

/// Location of the SSH daemon binary inside the image.
pub const SSHD_BINARY_PATH: &str = "/var/envd/bin/envd-sshd";

/// Directory holding one supervisor descriptor per managed process.
pub const HORUST_SERVICE_DIR: &str = "/etc/horust/services";

/// Directory receiving supervisor stdout/stderr logs.
pub const HORUST_LOG_DIR: &str = "/var/log/horust";

/// Environment variable naming the working directory at container start.
pub const ENVD_WORKDIR_ENV: &str = "ENVD_WORKDIR";

/// Home directory of the `envd` account.
pub const ENVD_HOME: &str = "/home/envd";

/// Home directory of `root`, used for non-dev images.
pub const ROOT_HOME: &str = "/root";

/// Ubuntu's search path, always the first PATH segments.
pub const DEFAULT_SYSTEM_PATH: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// PATH segments contributed by the Python installers.
pub const DEFAULT_CONDA_PATH: &[&str] = &["/opt/conda/envs/envd/bin", "/opt/conda/bin"];

/// Environment variables set before any dev-image step runs.
pub const BASE_ENVIRONMENT: &[(&str, &str)] = &[
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("LANG", "C.UTF-8"),
    ("LC_ALL", "C.UTF-8"),
];

/// OS packages every dev image receives.
pub const BASE_APT_PACKAGES: &[&str] = &[
    "bash-static",
    "libtinfo5",
    "libncursesw5",
    // conda dependencies
    "bzip2",
    "ca-certificates",
    "libglib2.0-0",
    "libsm6",
    "libxext6",
    "libxrender1",
    "mercurial",
    "procps",
    "subversion",
    "wget",
    // envd dependencies
    "curl",
    "openssh-client",
    "git",
    "sudo",
    "vim",
    "zsh",
    "locales",
];

/// Image label keys.
pub mod labels {
    /// Name of the environment the image was built for.
    pub const CONTAINER_NAME: &str = "ai.tensorchord.envd.container.name";
    /// Always `envd`.
    pub const VENDOR: &str = "ai.tensorchord.envd.vendor";
    /// `true` when the image targets GPUs.
    pub const GPU: &str = "ai.tensorchord.envd.gpu";
    /// Repository information as JSON.
    pub const REPO: &str = "ai.tensorchord.envd.repo";
    /// Exposed service ports as JSON.
    pub const PORTS: &str = "ai.tensorchord.envd.ports";
    /// System packages as JSON.
    pub const APT: &str = "ai.tensorchord.envd.apt.packages";
    /// Flattened PyPI packages as JSON.
    pub const PYPI: &str = "ai.tensorchord.envd.pypi.commands";
    /// R package groups as JSON.
    pub const R: &str = "ai.tensorchord.envd.r.packages";
    /// CUDA version.
    pub const CUDA: &str = "ai.tensorchord.envd.gpu.cuda";
    /// CUDNN version.
    pub const CUDNN: &str = "ai.tensorchord.envd.gpu.cudnn";
    /// Syntax version of the environment definition.
    pub const SYNTAX_VERSION: &str = "ai.tensorchord.envd.syntax.version";
    /// Serialized runtime metadata.
    pub const RUNTIME_GRAPH: &str = "ai.tensorchord.envd.graph.runtime";
    /// Serialized environment graph.
    pub const GENERAL_GRAPH: &str = "ai.tensorchord.envd.graph.general";
    /// Vendor value for [`VENDOR`].
    pub const VENDOR_ENVD: &str = "envd";
}

/// Joins path segments under the `envd` home directory.
#[must_use]
pub fn envd_home_dir(parts: &[&str]) -> String {
    join_under(ENVD_HOME, parts)
}

/// Joins path segments under the `root` home directory.
#[must_use]
pub fn root_home_dir(parts: &[&str]) -> String {
    join_under(ROOT_HOME, parts)
}

fn join_under(base: &str, parts: &[&str]) -> String {
    let mut path = base.to_string();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        path.push('/');
        path.push_str(part.trim_matches('/'));
    }
    path
}
