//! Rust via rustup.

use envd_common::constants::CURL_IMAGE;
use envd_llb::{CopyOptions, FileActions, Run, State};

use crate::compile::Compiler;

const RUST_HOME: &str = "/opt/rust";

impl Compiler<'_> {
    pub(crate) fn install_rust(&mut self, root: State, version: Option<&str>) -> State {
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh("curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs -o /tmp/rustup-init.sh")
                .custom_name("[internal] download rustup"),
        );
        for key in ["CARGO_HOME", "RUSTUP_HOME"] {
            let _ = self.graph.runtime.environ.insert(key.into(), RUST_HOME.into());
        }
        let mut run = Run::shell(
            "sh /tmp/rustup-init.sh -y -q --no-modify-path --profile minimal && rm /tmp/rustup-init.sh",
        )
        .custom_name("[internal] install rust");
        if let Some(version) = version {
            run = run.env("RUSTUP_VERSION", version);
        }
        let installed = root
            .file(
                FileActions::new()
                    .custom_name("[internal] prepare rustup")
                    .copy(&builder, "/tmp/rustup-init.sh", "/tmp/rustup-init.sh", CopyOptions::default()),
            )
            .with_env("CARGO_HOME", RUST_HOME)
            .with_env("RUSTUP_HOME", RUST_HOME)
            .run(run);
        self.record_user_directory(RUST_HOME);
        self.update_env_path(installed, &format!("{RUST_HOME}/bin"))
    }
}
