//! R from the CRAN apt repository.

use envd_common::constants::CURL_IMAGE;
use envd_llb::{CopyOptions, FileActions, MkdirOptions, Run, State};

use crate::compile::Compiler;

const CRAN_DEFAULT_MIRROR: &str = "https://cran.rstudio.com";
const CRAN_APT_URI: &str = "https://cloud.r-project.org/bin/linux/ubuntu";
const CRAN_SUITE: &str = "jammy-cran40/";
const CRAN_KEY_URL: &str = "https://cloud.r-project.org/bin/linux/ubuntu/marutter_pubkey.asc";
const CRAN_KEYRING: &str = "/etc/apt/keyrings/cran.asc";
const R_SITE_LIBRARY: &str = "/usr/local/lib/R/site-library";

/// One DEB822 apt source stanza.
struct DebSource<'a> {
    types: &'a str,
    uris: &'a str,
    suites: &'a str,
    components: &'a str,
    signed_by: &'a str,
}

impl DebSource<'_> {
    fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in [
            ("Types", self.types),
            ("URIs", self.uris),
            ("Suites", self.suites),
            ("Components", self.components),
            ("Signed-By", self.signed_by),
        ] {
            if !value.is_empty() {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

fn install_packages_script(mirror: &str, packages: &[String]) -> String {
    let quoted: Vec<String> = packages.iter().map(|p| format!("\"{p}\"")).collect();
    format!(
        "options(repos = c(CRAN = \"{mirror}\")); install.packages(c({}))",
        quoted.join(", ")
    )
}

impl Compiler<'_> {
    pub(crate) fn install_r(&mut self, root: State) -> State {
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh(format!("curl -fsSL {CRAN_KEY_URL} -o /tmp/cran.asc"))
                .custom_name("[internal] download CRAN signing key"),
        );
        let source = DebSource {
            types: "deb",
            uris: CRAN_APT_URI,
            suites: CRAN_SUITE,
            components: "",
            signed_by: CRAN_KEYRING,
        };
        let configured = root.file(
            FileActions::new()
                .custom_name("[internal] add CRAN apt repository")
                .mkdir("/etc/apt/keyrings", 0o755, MkdirOptions::parents())
                .copy(&builder, "/tmp/cran.asc", CRAN_KEYRING, CopyOptions::default().mode(0o644))
                .mkfile("/etc/apt/sources.list.d/cran.sources", 0o644, source.render(), None)
                .mkfile(
                    "/etc/apt/apt.conf.d/99use-deb822",
                    0o644,
                    "APT::Sources::Use-Deb822 \"true\";\n",
                    None,
                ),
        );
        self.record_user_directory(R_SITE_LIBRARY);
        configured.run(
            Run::shell(
                "apt-get update && apt-get install -y --no-install-recommends r-base \
                 && rm -rf /var/lib/apt/lists/*",
            )
            .custom_name("[internal] install r-base"),
        )
    }

    pub(crate) fn install_r_packages(&self, root: State) -> State {
        if self.graph.r_packages.is_empty() {
            return root;
        }
        let mirror = self
            .graph
            .cran_mirror_url
            .as_deref()
            .unwrap_or(CRAN_DEFAULT_MIRROR);
        let user = self.package_user();
        let mut state = root;
        if self.graph.dev {
            state = state.run(
                Run::shell(format!("chown -R {user}:{user} {R_SITE_LIBRARY}"))
                    .custom_name("[internal] prepare R site library"),
            );
        }
        self.graph.r_packages.iter().fold(state, |state, group| {
            state.run(
                Run::new(["R".to_string(), "-e".to_string(), install_packages_script(mirror, group)])
                    .user(user)
                    .custom_name(format!("[internal] install R packages {}", group.join(" "))),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deb822_source_skips_empty_fields() {
        let rendered = DebSource {
            types: "deb",
            uris: CRAN_APT_URI,
            suites: CRAN_SUITE,
            components: "",
            signed_by: CRAN_KEYRING,
        }
        .render();
        assert_eq!(
            rendered,
            "Types: deb\nURIs: https://cloud.r-project.org/bin/linux/ubuntu\nSuites: jammy-cran40/\nSigned-By: /etc/apt/keyrings/cran.asc\n"
        );
    }

    #[test]
    fn package_script_sets_the_mirror() {
        let script = install_packages_script(CRAN_DEFAULT_MIRROR, &["dplyr".into(), "ggplot2".into()]);
        assert_eq!(
            script,
            r#"options(repos = c(CRAN = "https://cran.rstudio.com")); install.packages(c("dplyr", "ggplot2"))"#
        );
    }
}
