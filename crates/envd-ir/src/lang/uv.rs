//! uv and its managed Python.

use envd_common::constants::CURL_IMAGE;
use envd_llb::{CopyOptions, FileActions, Run, State};

use crate::compile::Compiler;

const UV_VERSION: &str = "0.7.3";
const UV_ENVIRONMENT: &[(&str, &str)] = &[
    ("UV_LINK_MODE", "copy"),
    ("UV_PYTHON_PREFERENCE", "only-managed"),
];

impl Compiler<'_> {
    pub(crate) fn compile_uv(&mut self, root: State) -> State {
        let Some(uv) = self.graph.uv.clone() else {
            return root;
        };
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh(format!(
                "mkdir -p /tmp/uv && wget -qO- https://github.com/astral-sh/uv/releases/download/{UV_VERSION}/uv-$(uname -m)-unknown-linux-gnu.tar.gz | tar -xz --strip-components=1 -C /tmp/uv || exit 1"
            ))
            .custom_name(format!("[internal] download uv {UV_VERSION}")),
        );
        let mut state = root.file(
            FileActions::new()
                .custom_name(format!("[internal] install uv {UV_VERSION}"))
                .copy(&builder, "/tmp/uv/uv", "/usr/bin/uv", CopyOptions::default())
                .copy(&builder, "/tmp/uv/uvx", "/usr/bin/uvx", CopyOptions::default()),
        );
        for (key, value) in UV_ENVIRONMENT {
            let _ = self.graph.runtime.environ.insert((*key).into(), (*value).into());
            state = state.with_env(*key, *value);
        }
        tracing::debug!(python = %uv.python_version, "install uv managed python");
        state.run(
            Run::shell(format!("uv python install {}", uv.python_version))
                .user(self.package_user())
                .custom_name(format!("[internal] uv install python {}", uv.python_version)),
        )
    }
}
