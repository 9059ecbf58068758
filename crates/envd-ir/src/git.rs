//! `~/.gitconfig` of dev environments.

use envd_common::constants::envd_home_dir;
use envd_llb::{FileActions, State};

use crate::compile::Compiler;
use crate::types::GitConfig;

fn render_git_config(config: &GitConfig) -> String {
    format!(
        "\n[user]\n\temail = {}\n\tname = {}\n[core]\n\teditor = {}\n\n",
        config.email, config.name, config.editor
    )
}

impl Compiler<'_> {
    pub(crate) fn compile_git(&self, root: State) -> State {
        let Some(config) = &self.graph.git else {
            return root;
        };
        root.file(
            FileActions::new().custom_name("[internal] setting git config").mkfile(
                envd_home_dir(&[".gitconfig"]),
                0o644,
                render_git_config(config),
                Some(self.identity),
            ),
        )
    }
}
