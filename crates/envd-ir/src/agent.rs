//! Coding agents installed from their GitHub releases.

use envd_common::constants::CURL_IMAGE;
use envd_llb::{CopyOptions, FileActions, Run, State};

use crate::compile::Compiler;
use crate::types::{AgentKind, CodeAgent};

const CODEX_DEFAULT_VERSION: &str = "0.98.0";
const CODEX_RELEASE_OWNER: &str = "openai";
const CODEX_RELEASE_REPO: &str = "codex";

/// Strips the `rust-v` or `v` prefix of a codex release tag.
fn codex_version_from_tag(tag: &str) -> &str {
    let tag = tag.strip_prefix("rust-v").unwrap_or(tag);
    tag.strip_prefix('v').unwrap_or(tag)
}

impl Compiler<'_> {
    pub(crate) fn compile_code_agents(&mut self, root: State) -> State {
        let agents = self.graph.agents.clone();
        let mut state = root;
        for agent in &agents {
            state = match agent.kind {
                AgentKind::Codex => self.install_codex(state, agent),
            };
        }
        state
    }

    fn resolve_codex_version(&mut self, agent: &CodeAgent) -> String {
        if let Some(version) = &agent.version {
            return version.clone();
        }
        match self.host.latest_release(CODEX_RELEASE_OWNER, CODEX_RELEASE_REPO) {
            Ok(tag) => codex_version_from_tag(&tag).to_string(),
            Err(e) => {
                tracing::warn!(error = %e, default = CODEX_DEFAULT_VERSION, "failed to resolve latest codex version");
                CODEX_DEFAULT_VERSION.to_string()
            }
        }
    }

    fn install_codex(&mut self, root: State, agent: &CodeAgent) -> State {
        let version = self.resolve_codex_version(agent);
        tracing::debug!(codex_version = %version, "parse the agent version");
        let builder = State::image(CURL_IMAGE)
            .run(
                Run::strict_sh(format!(
                    "wget -qO- https://github.com/openai/codex/releases/download/rust-v{version}/codex-$(uname -m)-unknown-linux-musl.tar.gz | tar -xz -C /tmp || exit 1"
                ))
                .custom_name(format!("[internal] download codex {version}")),
            )
            .run(
                Run::strict_sh("mv /tmp/codex-$(uname -m)-unknown-linux-musl /tmp/codex")
                    .custom_name(format!("[internal] prepare codex {version}")),
            );
        root.file(
            FileActions::new()
                .custom_name("[internal] install codex")
                .copy(&builder, "/tmp/codex", "/usr/bin/codex", CopyOptions::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_tag_prefixes_are_stripped() {
        assert_eq!(codex_version_from_tag("rust-v0.98.0"), "0.98.0");
        assert_eq!(codex_version_from_tag("v1.2.3"), "1.2.3");
        assert_eq!(codex_version_from_tag("0.1.0"), "0.1.0");
    }
}
