//! Build output files and their human-readable rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use envd_ir::RuntimeGraph;
use serde::{Deserialize, Serialize};

/// File holding the serialized build definition.
pub const DEFINITION_FILE: &str = "definition.json";

/// File holding the image configuration.
pub const IMAGE_CONFIG_FILE: &str = "image.json";

/// Image configuration submitted alongside the build definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Entrypoint argv.
    pub entrypoint: Vec<String>,
    /// Environment as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Exposed ports as `port/tcp`.
    pub exposed_ports: BTreeSet<String>,
    /// Image labels.
    pub labels: BTreeMap<String, String>,
    /// Host directories backing the build's local sources.
    pub local_sources: BTreeMap<String, PathBuf>,
    /// Requested GPU count.
    pub gpus: i32,
    /// Requested shared memory size in MB.
    pub shm_size: i32,
}

impl ImageConfig {
    /// Reads an image configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid image config {}", path.display()))
    }

    /// Decodes the runtime graph label.
    ///
    /// # Errors
    ///
    /// Returns an error if the label is missing or malformed.
    pub fn runtime_graph(&self) -> anyhow::Result<RuntimeGraph> {
        let Some(raw) = self.labels.get(envd_common::constants::labels::RUNTIME_GRAPH) else {
            anyhow::bail!("image config has no runtime graph label");
        };
        Ok(RuntimeGraph::load(raw)?)
    }
}

/// Writes `value` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    write_bytes(path, &serde_json::to_vec_pretty(value)?)
}

/// Writes raw bytes, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote build output");
    Ok(())
}

/// Renders the runtime graph for terminal display.
#[must_use]
pub fn format_runtime(graph: &RuntimeGraph) -> String {
    let mut out = String::new();
    if !graph.commands.is_empty() {
        out.push_str("commands:\n");
        for (name, command) in &graph.commands {
            let _ = writeln!(out, "  {name}: {command}");
        }
    }
    if !graph.init_script.is_empty() {
        out.push_str("init:\n");
        for script in &graph.init_script {
            let _ = writeln!(out, "  {}", script.join(" && "));
        }
    }
    if !graph.daemon.is_empty() {
        out.push_str("daemons:\n");
        for argv in &graph.daemon {
            let _ = writeln!(out, "  {}", argv.join(" "));
        }
    }
    if !graph.environ.is_empty() {
        out.push_str("environ:\n");
        for (key, value) in &graph.environ {
            let _ = writeln!(out, "  {key}={value}");
        }
    }
    let _ = writeln!(out, "path: {}", graph.path());
    if !graph.expose.is_empty() {
        out.push_str("ports:\n");
        for item in &graph.expose {
            let host = if item.host_port == 0 {
                "auto".to_string()
            } else {
                item.host_port.to_string()
            };
            let _ = writeln!(
                out,
                "  {} -> {}:{host} ({})",
                item.envd_port, item.listen_addr, item.service_name
            );
        }
    }
    out
}
