//! Interactive shell and prompt setup.

use envd_common::constants::{CURL_IMAGE, envd_home_dir};
use envd_common::error::Result;
use envd_llb::{CopyOptions, FileActions, MkdirOptions, Run, State};

use crate::compile::{CACHE_DIR_SOURCE, Compiler};
use crate::lang::conda::CONDA_BIN_DIR;
use crate::types::Shell;

const STARSHIP_VERSION: &str = "1.24.0";
const FISH_VERSION: &str = "4.0.2";

const STARSHIP_CONFIG: &str = include_str!("../assets/starship.toml");
const OH_MY_ZSH_INSTALL: &str = include_str!("../assets/install_oh_my_zsh.sh");
const ZSHRC: &str = include_str!("../assets/zshrc");

/// Returns the rc file of `shell` under `home_dir`.
fn rc_path(shell: Shell, home_dir: impl Fn(&[&str]) -> String) -> String {
    match shell {
        Shell::Bash => home_dir(&[".bashrc"]),
        Shell::Zsh => home_dir(&[".zshrc"]),
        Shell::Fish => home_dir(&[".config", "fish", "config.fish"]),
    }
}

fn append_line(line: &str, file: &str) -> String {
    format!("echo '{line}' >> {file}")
}

impl Compiler<'_> {
    pub(crate) fn compile_shell(&mut self, root: State) -> Result<State> {
        let shell = self.graph.shell;
        let _ = self
            .graph
            .runtime
            .environ
            .insert("SHELL".into(), shell.binary().into());
        let mut state = match shell {
            Shell::Bash => root,
            Shell::Zsh => self.compile_zsh(root)?,
            Shell::Fish => self.compile_fish(root),
        };
        if self.graph.conda.is_some() {
            state = self.compile_conda_shell(state);
        }
        Ok(state)
    }

    fn compile_zsh(&mut self, root: State) -> Result<State> {
        let cached = self.host.oh_my_zsh()?;
        tracing::debug!(cached, "oh-my-zsh ready");
        let install_path = envd_home_dir(&["install.sh"]);
        let cache = State::local(CACHE_DIR_SOURCE);
        let staged = root.file(
            FileActions::new()
                .custom_name("[internal] prepare oh-my-zsh")
                .copy(
                    &cache,
                    "oh-my-zsh",
                    envd_home_dir(&[".oh-my-zsh"]),
                    CopyOptions::default().create_dest_path().owner(self.identity),
                )
                .mkfile(install_path.as_str(), 0o666, OH_MY_ZSH_INSTALL, Some(self.identity)),
        );
        Ok(staged
            .run(Run::new(["bash", install_path.as_str()]).custom_name("[internal] install oh-my-zsh"))
            .file(
                FileActions::new()
                    .custom_name("[internal] setting zshrc")
                    .mkfile(envd_home_dir(&[".zshrc"]), 0o666, ZSHRC, Some(self.identity)),
            ))
    }

    fn compile_fish(&self, root: State) -> State {
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh(format!(
                "wget -qO- https://github.com/fish-shell/fish-shell/releases/download/{FISH_VERSION}/fish-{FISH_VERSION}-linux-$(uname -m).tar.xz | tar -xJ -C /tmp || exit 1"
            ))
            .custom_name(format!("[internal] download fish {FISH_VERSION}")),
        );
        root.file(
            FileActions::new()
                .custom_name(format!("[internal] install fish {FISH_VERSION}"))
                .copy(&builder, "/tmp/fish", "/usr/bin/fish", CopyOptions::default())
                .mkdir(
                    envd_home_dir(&[".config", "fish"]),
                    0o755,
                    MkdirOptions::parents().owner(self.identity),
                ),
        )
        .run(Run::new(["/usr/bin/fish", "--install=noconfirm"]).custom_name("[internal] self-install fish"))
    }

    /// Activates the `envd` conda environment in the chosen shell.
    fn compile_conda_shell(&self, root: State) -> State {
        let shell = self.graph.shell;
        let rc = rc_path(shell, |parts| self.home_dir(parts));
        let activate = match shell {
            Shell::Fish => "conda activate envd".to_string(),
            Shell::Bash | Shell::Zsh => format!("source {CONDA_BIN_DIR}/activate envd"),
        };
        root.run(
            Run::shell(self.conda_init_shell(shell.name()))
                .custom_name(format!("[internal] init conda {shell} env")),
        )
        .run(
            Run::shell(append_line(&activate, &rc))
                .custom_name(format!("[internal] add conda environment to {rc}")),
        )
    }

    pub(crate) fn compile_starship(&self, root: State) -> State {
        let builder = State::image(CURL_IMAGE).run(
            Run::strict_sh(format!(
                "wget -qO- https://github.com/starship/starship/releases/download/v{STARSHIP_VERSION}/starship-$(uname -m)-unknown-linux-musl.tar.gz | tar -xz -C /tmp || exit 1"
            ))
            .custom_name(format!("[internal] download starship {STARSHIP_VERSION}")),
        );
        root.file(
            FileActions::new()
                .custom_name(format!("[internal] install starship {STARSHIP_VERSION}"))
                .copy(&builder, "/tmp/starship", "/usr/local/bin/starship", CopyOptions::default()),
        )
    }

    /// Wires the prompt into bash and, when selected, into zsh or fish.
    pub(crate) fn compile_prompt(&self, root: State) -> State {
        let config = root.file(
            FileActions::new()
                .custom_name("[internal] setting prompt starship config")
                .mkdir(
                    envd_home_dir(&[".config"]),
                    0o755,
                    MkdirOptions::parents().owner(self.identity),
                )
                .mkfile(
                    envd_home_dir(&[".config", "starship.toml"]),
                    0o644,
                    STARSHIP_CONFIG,
                    Some(self.identity),
                ),
        );
        let bashrc = envd_home_dir(&[".bashrc"]);
        let mut state = config.run(
            Run::shell(append_line(r#"eval "$(starship init bash)""#, &bashrc))
                .custom_name("[internal] setting prompt bash config"),
        );
        match self.graph.shell {
            Shell::Bash => {}
            Shell::Zsh => {
                state = state.run(
                    Run::shell(append_line(r#"eval "$(starship init zsh)""#, &envd_home_dir(&[".zshrc"])))
                        .custom_name("[internal] setting prompt zsh config"),
                );
            }
            Shell::Fish => {
                let config_fish = envd_home_dir(&[".config", "fish", "config.fish"]);
                state = state.run(
                    Run::shell(append_line("starship init fish | source", &config_fish))
                        .custom_name("[internal] setting prompt fish config"),
                );
            }
        }
        state
    }
}
