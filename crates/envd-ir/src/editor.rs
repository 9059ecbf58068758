//! Editor integrations: VSCode extensions, Jupyter and RStudio server.

use std::fmt;

use envd_common::constants::{ENVD_WORKDIR_ENV, JUPYTER_PORT_IN_CONTAINER, envd_home_dir};
use envd_common::error::{EnvdError, Result};
use envd_common::types::Identity;
use envd_llb::{CopyOptions, FileActions, State};
use serde::{Deserialize, Serialize};

use crate::compile::{CACHE_DIR_SOURCE, Compiler};
use crate::graph::Graph;
use crate::language::LanguageKind;
use crate::types::JupyterConfig;

/// A VSCode extension, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Plugin {
    /// Marketplace publisher.
    pub publisher: String,
    /// Extension name.
    pub extension: String,
    /// Pinned version, latest when `None`.
    pub version: Option<String>,
}

impl Plugin {
    /// Parses `publisher.extension` or `publisher.extension-1.2.3`.
    ///
    /// A trailing `-suffix` is only treated as a version when it starts with
    /// a digit, so `ms-vscode.cpptools-extension-pack` has no version.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] if there is no `.` separating the publisher.
    pub fn parse(value: &str) -> Result<Self> {
        let Some((publisher, rest)) = value.split_once('.') else {
            return Err(EnvdError::Config {
                message: format!("invalid publisher in vscode plugin {value}"),
            });
        };
        let (extension, version) = match rest.rsplit_once('-') {
            Some((extension, version))
                if version.chars().next().is_some_and(|c| c.is_ascii_digit()) =>
            {
                (extension, Some(version.to_string()))
            }
            _ => (rest, None),
        };
        tracing::debug!(publisher, extension, version = ?version, "parsed vscode plugin");
        Ok(Self {
            publisher: publisher.to_string(),
            extension: extension.to_string(),
            version,
        })
    }

    /// Path of the unpacked `extension/` directory relative to the cache dir.
    #[must_use]
    pub fn extension_path(&self) -> String {
        format!("{self}/extension/")
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}.{}-{version}", self.publisher, self.extension),
            None => write!(f, "{}.{}", self.publisher, self.extension),
        }
    }
}

/// Builds the notebook server argv.
///
/// Without a working dir the notebook dir is resolved from `ENVD_WORKDIR`
/// when the container starts.
#[must_use]
pub fn jupyter_command(config: &JupyterConfig, identity: Identity, working_dir: Option<&str>) -> Vec<String> {
    let token = if config.token.is_empty() {
        "''".to_string()
    } else {
        config.token.clone()
    };
    let working_dir = working_dir.map_or_else(|| format!("${{{ENVD_WORKDIR_ENV}}}"), ToString::to_string);
    let mut cmd: Vec<String> = vec![
        "python3".into(),
        "-m".into(),
        "notebook".into(),
        "--ip".into(),
        "0.0.0.0".into(),
        "--notebook-dir".into(),
        working_dir,
        "--NotebookApp.token".into(),
        token,
        "--port".into(),
        JUPYTER_PORT_IN_CONTAINER.to_string(),
    ];
    if identity.is_root() {
        cmd.push("--allow-root".into());
    }
    cmd
}

/// Builds the RStudio server argv.
#[must_use]
pub fn rstudio_command() -> Vec<String> {
    // TODO: run rserver as the envd user once it honours the working dir
    vec!["sudo".into(), "/usr/lib/rstudio-server/bin/rserver".into()]
}

impl Graph {
    /// Adds the notebook package when Jupyter is enabled.
    pub(crate) fn prepare_jupyter(&mut self) -> Result<()> {
        if self.jupyter.is_none() {
            return Ok(());
        }
        if !self.has_language(LanguageKind::Python) {
            return Err(EnvdError::Config {
                message: "jupyter is only supported with python".into(),
            });
        }
        let group = vec!["jupyter".to_string()];
        if !self.pypi_packages.contains(&group) {
            self.pypi_packages.push(group);
        }
        Ok(())
    }
}

impl Compiler<'_> {
    pub(crate) fn compile_vscode(&mut self, root: State) -> Result<State> {
        let cache = State::local(CACHE_DIR_SOURCE);
        let mut state = root;
        for plugin in &self.graph.vscode_plugins {
            let cached = self.host.vscode_plugin(plugin)?;
            tracing::debug!(plugin = %plugin, cached, "vscode plugin ready");
            let dest = envd_home_dir(&[".vscode-server", "extensions", &plugin.to_string()]);
            state = state.file(
                FileActions::new()
                    .custom_name(format!("install vscode plugin {plugin}"))
                    .copy(
                        &cache,
                        plugin.extension_path(),
                        dest,
                        CopyOptions::default().create_dest_path().owner(self.identity),
                    ),
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jupyter(token: &str) -> JupyterConfig {
        JupyterConfig {
            token: token.into(),
            port: 8888,
        }
    }

    #[test]
    fn plugin_without_version() {
        let plugin = Plugin::parse("ms-python.python").expect("parse");
        assert_eq!(plugin.publisher, "ms-python");
        assert_eq!(plugin.extension, "python");
        assert_eq!(plugin.version, None);
    }

    #[test]
    fn plugin_with_version() {
        let plugin = Plugin::parse("ms-python.python-2021.5.0").expect("parse");
        assert_eq!(plugin.extension, "python");
        assert_eq!(plugin.version.as_deref(), Some("2021.5.0"));
        assert_eq!(plugin.to_string(), "ms-python.python-2021.5.0");
        assert_eq!(plugin.extension_path(), "ms-python.python-2021.5.0/extension/");
    }

    #[test]
    fn dash_without_digit_is_part_of_the_name() {
        let plugin = Plugin::parse("ms-vscode.cpptools-extension-pack").expect("parse");
        assert_eq!(plugin.extension, "cpptools-extension-pack");
        assert_eq!(plugin.version, None);
    }

    #[test]
    fn plugin_without_publisher_is_rejected() {
        assert!(Plugin::parse("python").is_err());
    }

    #[test]
    fn jupyter_for_regular_user_without_token() {
        let cmd = jupyter_command(&jupyter(""), Identity::new(1000, 1000), None);
        let joined = cmd.join(" ");
        assert!(joined.contains("--NotebookApp.token ''"));
        assert!(joined.contains("--notebook-dir ${ENVD_WORKDIR}"));
        assert!(!cmd.contains(&"--allow-root".to_string()));
    }

    #[test]
    fn jupyter_for_root_allows_root() {
        let cmd = jupyter_command(&jupyter("test"), Identity::new(0, 0), Some("/home/envd/work"));
        assert!(cmd.join(" ").contains("--NotebookApp.token test"));
        assert_eq!(cmd.last().map(String::as_str), Some("--allow-root"));
        assert!(cmd.contains(&"/home/envd/work".to_string()));
    }

    #[test]
    fn jupyter_requires_python() {
        let mut graph = Graph::new();
        graph.set_jupyter("", 8888);
        assert!(graph.prepare_jupyter().is_err());

        graph.add_language("python3.10").expect("python");
        graph.prepare_jupyter().expect("prepare");
        graph.prepare_jupyter().expect("prepare twice");
        assert_eq!(graph.pypi_packages, vec![vec!["jupyter".to_string()]]);
    }
}
