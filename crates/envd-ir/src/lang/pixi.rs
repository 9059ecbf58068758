//! pixi and its global config.

use std::collections::BTreeMap;

use envd_common::constants::CURL_IMAGE;
use envd_llb::{CopyOptions, FileActions, MkdirOptions, Run, State};
use serde::Serialize;

use crate::compile::Compiler;
use crate::types::PixiConfig;

const PIXI_VERSION: &str = "v0.46.0";
const PIXI_CONFIG_PATH: &str = "/etc/pixi/config.toml";
const CONDA_FORGE: &str = "https://conda.anaconda.org/conda-forge";
const PREFIX_DEV_MIRROR: &str = "https://prefix.dev/conda-forge";

#[derive(Debug, Default, Serialize)]
struct PixiConfigFile<'a> {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    mirrors: BTreeMap<&'a str, Vec<&'a str>>,
    #[serde(rename = "pypi-config", skip_serializing_if = "Option::is_none")]
    pypi_config: Option<PypiSection<'a>>,
}

#[derive(Debug, Serialize)]
struct PypiSection<'a> {
    #[serde(rename = "index-url")]
    index_url: &'a str,
}

/// Renders `config.toml`, or `None` when pixi's defaults apply.
fn render_config(config: &PixiConfig) -> Option<String> {
    let mut file = PixiConfigFile::default();
    if config.use_pixi_mirror {
        let _ = file.mirrors.insert(CONDA_FORGE, vec![PREFIX_DEV_MIRROR]);
    }
    file.pypi_config = config
        .pypi_index
        .as_deref()
        .map(|index_url| PypiSection { index_url });
    if file.mirrors.is_empty() && file.pypi_config.is_none() {
        return None;
    }
    match toml::to_string(&file) {
        Ok(rendered) => Some(rendered),
        Err(e) => {
            tracing::warn!(error = %e, "failed to render pixi config");
            None
        }
    }
}

impl Compiler<'_> {
    pub(crate) fn compile_pixi(&self, root: State) -> State {
        let Some(pixi) = &self.graph.pixi else {
            return root;
        };
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh(format!(
                "wget -qO- https://github.com/prefix-dev/pixi/releases/download/{PIXI_VERSION}/pixi-$(uname -m)-unknown-linux-musl.tar.gz | tar -xz -C /tmp || exit 1"
            ))
            .custom_name(format!("[internal] download pixi {PIXI_VERSION}")),
        );
        let mut actions = FileActions::new()
            .custom_name(format!("[internal] install pixi {PIXI_VERSION}"))
            .copy(&builder, "/tmp/pixi", "/usr/bin/pixi", CopyOptions::default());
        if let Some(config) = render_config(pixi) {
            actions = actions
                .mkdir("/etc/pixi", 0o755, MkdirOptions::parents())
                .mkfile(PIXI_CONFIG_PATH, 0o644, config, None);
        }
        root.file(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_not_written() {
        assert!(render_config(&PixiConfig::default()).is_none());
    }

    #[test]
    fn mirror_and_index_are_rendered() {
        let rendered = render_config(&PixiConfig {
            use_pixi_mirror: true,
            pypi_index: Some("https://pypi.tuna.tsinghua.edu.cn/simple".into()),
        })
        .expect("config");
        let parsed: toml::Value = toml::from_str(&rendered).expect("toml");
        assert_eq!(
            parsed["mirrors"][CONDA_FORGE][0].as_str(),
            Some(PREFIX_DEV_MIRROR)
        );
        assert_eq!(
            parsed["pypi-config"]["index-url"].as_str(),
            Some("https://pypi.tuna.tsinghua.edu.cn/simple")
        );
    }
}
