//! Process supervisor descriptors started by the dev image entrypoint.
//!
//! Each managed process gets one horust service file under
//! `/etc/horust/services`. SSH comes first, then the init scripts, then the
//! daemons and editor servers, which wait for every init script to finish.

use envd_common::constants::{
    ENVD_WORKDIR_ENV, HORUST_IMAGE, HORUST_LOG_DIR, HORUST_SERVICE_DIR, SSH_PORT_IN_CONTAINER,
    SSHD_BINARY_PATH,
};
use envd_common::error::{EnvdError, Result};
use envd_common::types::Identity;
use envd_llb::{CopyOptions, FileActions, MkdirOptions, State};
use serde::{Deserialize, Serialize};

use crate::compile::Compiler;
use crate::editor::{jupyter_command, rstudio_command};
use crate::graph::Graph;

/// One horust service file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceDescriptor {
    /// Service name, also the file name.
    pub name: String,
    /// Command line, may span several lines.
    pub command: String,
    /// Log file for stdout.
    pub stdout: String,
    /// Log file for stderr.
    pub stderr: String,
    /// User the process runs as, resolved at container start.
    pub user: String,
    /// Working directory, resolved at container start.
    pub working_directory: String,
    /// Services that must have started first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_after: Vec<String>,
    /// Environment handling.
    pub environment: Environment,
    /// Restart policy.
    pub restart: Restart,
    /// Shutdown behaviour.
    pub termination: Termination,
}

/// `[environment]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Environment {
    /// Inherit the supervisor's environment.
    pub keep_env: bool,
}

/// `[restart]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restart {
    /// When to restart.
    pub strategy: String,
    /// Delay between attempts.
    pub backoff: String,
    /// Maximum attempts.
    pub attempts: u32,
}

/// `[termination]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    /// Grace period before the process is killed.
    pub wait: String,
}

impl ServiceDescriptor {
    /// Creates a descriptor with the default log, restart and termination settings.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>, start_after: Vec<String>) -> Self {
        let name = name.into();
        Self {
            command: command.into(),
            stdout: format!("{HORUST_LOG_DIR}/{name}_stdout.log"),
            stderr: format!("{HORUST_LOG_DIR}/{name}_stderr.log"),
            user: "${USER}".into(),
            working_directory: format!("${{{ENVD_WORKDIR_ENV}}}"),
            start_after,
            environment: Environment { keep_env: true },
            restart: Restart {
                strategy: "on-failure".into(),
                backoff: "1s".into(),
                attempts: 2,
            },
            termination: Termination { wait: "5s".into() },
            name,
        }
    }

    /// Path of the service file inside the image.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{HORUST_SERVICE_DIR}/{}.toml", self.name)
    }

    /// Renders the service file.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::TemplateRenderFailed`] if the descriptor cannot be encoded.
    pub fn render(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| EnvdError::TemplateRenderFailed {
            name: self.path(),
            reason: e.to_string(),
        })
    }
}

/// Lists the services of a dev image in start order.
///
/// # Errors
///
/// Returns [`EnvdError::MutuallyExclusiveConfig`] when both a custom
/// entrypoint and init scripts are set.
pub fn services(graph: &Graph, identity: Identity) -> Result<Vec<ServiceDescriptor>> {
    check_entrypoint(graph)?;
    let mut services = Vec::new();
    if graph.entrypoint.is_empty() {
        let command = format!(
            "{SSHD_BINARY_PATH} --port {SSH_PORT_IN_CONTAINER} --shell {}",
            graph.shell
        );
        services.push(ServiceDescriptor::new("sshd", command, Vec::new()));
    }

    let mut inits = Vec::with_capacity(graph.runtime.init_script.len());
    for (i, commands) in graph.runtime.init_script.iter().enumerate() {
        let name = format!("init_{i}");
        let script = format!("set -euo pipefail\n{}", commands.join("\n"));
        let command = format!("/bin/bash -c {}", single_quote(&script));
        services.push(ServiceDescriptor::new(name.as_str(), command, Vec::new()));
        inits.push(name);
    }
    for (i, argv) in graph.runtime.daemon.iter().enumerate() {
        services.push(ServiceDescriptor::new(format!("daemon_{i}"), argv.join(" "), inits.clone()));
    }
    if let Some(jupyter) = &graph.jupyter {
        let command = jupyter_command(jupyter, identity, None).join(" ");
        services.push(ServiceDescriptor::new("jupyter", command, inits.clone()));
    }
    if graph.rstudio_server.is_some() {
        services.push(ServiceDescriptor::new("rstudio", rstudio_command().join(" "), inits));
    }
    Ok(services)
}

/// Quotes `value` for a POSIX shell, closing and reopening around each `'`.
fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn check_entrypoint(graph: &Graph) -> Result<()> {
    if !graph.entrypoint.is_empty() && !graph.runtime.init_script.is_empty() {
        return Err(EnvdError::MutuallyExclusiveConfig {
            message: "`config.entrypoint` cannot be combined with `runtime.init`".into(),
        });
    }
    Ok(())
}

impl Compiler<'_> {
    pub(crate) fn check_entrypoint(&self) -> Result<()> {
        check_entrypoint(self.graph)
    }

    pub(crate) fn install_horust(&self, root: State) -> State {
        root.file(
            FileActions::new()
                .custom_name("[internal] install horust")
                .copy(&State::image(HORUST_IMAGE), "/", "/usr/local/bin", CopyOptions::default())
                .mkdir(HORUST_SERVICE_DIR, 0o755, MkdirOptions::parents())
                .mkdir(HORUST_LOG_DIR, 0o777, MkdirOptions::parents()),
        )
    }

    pub(crate) fn compile_entrypoint(&self, root: State) -> Result<State> {
        let mut actions = FileActions::new().custom_name("[internal] create horust services");
        for service in services(self.graph, self.identity)? {
            tracing::debug!(service = %service.name, deps = ?service.start_after, "add supervised process");
            actions = actions.mkfile(service.path(), 0o644, service.render()?, Some(self.identity));
        }
        Ok(if actions.is_empty() { root } else { root.file(actions) })
    }
}
