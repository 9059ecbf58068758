//! Go from the official release tarballs.

use envd_llb::State;

use super::Release;
use crate::compile::Compiler;

const GO_DEFAULT_VERSION: &str = "1.22.2";

impl Compiler<'_> {
    pub(crate) fn install_golang(&mut self, root: State, version: Option<&str>) -> State {
        let version = version.unwrap_or(GO_DEFAULT_VERSION);
        let release = Release {
            name: "go",
            version,
            download: format!(
                "ARCH=$(uname -m | sed -e 's/x86_64/amd64/' -e 's/aarch64/arm64/') && \
                 wget -qO- https://go.dev/dl/go{version}.linux-$ARCH.tar.gz \
                 | tar -xz --strip-components=1 -C /tmp/go"
            ),
            install_root: "/usr/local/go",
        };
        self.install_release(root, &release)
    }
}
