//! Node.js from the official release tarballs.

use envd_llb::State;

use super::Release;
use crate::compile::Compiler;

const NODEJS_DEFAULT_VERSION: &str = "20.12.2";

impl Compiler<'_> {
    pub(crate) fn install_nodejs(&mut self, root: State, version: Option<&str>) -> State {
        let version = version.map_or(NODEJS_DEFAULT_VERSION, |v| v.trim_start_matches('v'));
        let release = Release {
            name: "nodejs",
            version,
            download: format!(
                "ARCH=$(uname -m | sed -e 's/x86_64/x64/' -e 's/aarch64/arm64/') && \
                 wget -qO- https://nodejs.org/dist/v{version}/node-v{version}-linux-$ARCH.tar.gz \
                 | tar -xz --strip-components=1 -C /tmp/nodejs"
            ),
            install_root: "/opt/nodejs",
        };
        self.install_release(root, &release)
    }
}
