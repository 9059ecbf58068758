//! Julia from the official release tarballs.

use envd_llb::{Run, State};

use super::Release;
use crate::compile::Compiler;

const JULIA_DEFAULT_VERSION: &str = "1.10.4";
const JULIA_INSTALL_ROOT: &str = "/usr/local/julia";

/// Returns the `major.minor` release directory of a version.
fn release_dir(version: &str) -> &str {
    match version.match_indices('.').nth(1) {
        Some((i, _)) => &version[..i],
        None => version,
    }
}

fn julia_download(version: &str) -> String {
    format!(
        "ARCH=$(uname -m) && DIR=$(echo $ARCH | sed -e 's/x86_64/x64/') && \
         wget -qO- https://julialang-s3.julialang.org/bin/linux/$DIR/{}/julia-{version}-linux-$ARCH.tar.gz \
         | tar -xz --strip-components=1 -C /tmp/julia",
        release_dir(version)
    )
}

fn add_packages_script(packages: &[String]) -> String {
    let quoted: Vec<String> = packages.iter().map(|p| format!("\"{p}\"")).collect();
    format!("using Pkg; Pkg.add([{}])", quoted.join(", "))
}

impl Compiler<'_> {
    pub(crate) fn install_julia(&mut self, root: State, version: Option<&str>) -> State {
        let version = version.unwrap_or(JULIA_DEFAULT_VERSION);
        let release = Release {
            name: "julia",
            version,
            download: julia_download(version),
            install_root: JULIA_INSTALL_ROOT,
        };
        self.install_release(root, &release)
    }

    pub(crate) fn install_julia_packages(&mut self, root: State) -> State {
        if self.graph.julia_packages.is_empty() {
            return root;
        }
        let depot = self.home_dir(&[".julia"]);
        self.record_user_directory(&depot);
        let user = self.package_user();
        let server = self.graph.julia_package_server.clone();
        self.graph.julia_packages.iter().fold(root, |state, group| {
            let mut run = Run::new(["julia".to_string(), "-e".to_string(), add_packages_script(group)])
                .user(user)
                .custom_name(format!("[internal] install julia packages {}", group.join(" ")));
            if let Some(server) = &server {
                run = run.env("JULIA_PKG_SERVER", server.as_str());
            }
            state.run(run)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_dir_is_major_minor() {
        assert_eq!(release_dir("1.10.4"), "1.10");
        assert_eq!(release_dir("1.9"), "1.9");
    }

    #[test]
    fn download_targets_both_architectures() {
        let script = julia_download("1.10.4");
        assert!(script.contains("/1.10/julia-1.10.4-linux-$ARCH.tar.gz"));
        assert!(script.contains("s/x86_64/x64/"));
    }

    #[test]
    fn packages_are_quoted() {
        let script = add_packages_script(&["Flux".into(), "CSV".into()]);
        assert_eq!(script, r#"using Pkg; Pkg.add(["Flux", "CSV"])"#);
    }
}
