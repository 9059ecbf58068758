//! The `envd` account and ownership of the directories it writes to.

use envd_common::constants::{BASE_ENVIRONMENT, ENVD_USER};
use envd_llb::{Run, State};

use crate::compile::Compiler;

/// Placeholder ID the `envd` account is created with before being aliased to root.
const ROOT_ALIAS_ID: u32 = 1001;

impl Compiler<'_> {
    /// Creates the `envd` group and user for the resolved identity.
    ///
    /// For root the account is created with a placeholder ID and its
    /// passwd and group entries are then aliased onto uid/gid 0.
    pub(crate) fn compile_user_group(&self, root: State) -> State {
        let identity = self.identity;
        let steps: Vec<(String, String)> = if identity.is_root() {
            vec![
                (
                    format!("groupadd -g {ROOT_ALIAS_ID} envd"),
                    "[internal] still create group envd for root context".into(),
                ),
                (
                    format!("useradd -p \"\" -u {ROOT_ALIAS_ID} -g envd -s /bin/sh -m envd"),
                    "[internal] still create user envd for root context".into(),
                ),
                (
                    "usermod -s /bin/sh root".into(),
                    "[internal] set root default shell to /bin/sh".into(),
                ),
                (
                    format!("sed -i \"s/envd:x:{ROOT_ALIAS_ID}:{ROOT_ALIAS_ID}/envd:x:0:0/g\" /etc/passwd"),
                    "[internal] set envd uid to 0 as root".into(),
                ),
                (
                    "sed -i \"s./root./home/envd.g\" /etc/passwd".into(),
                    "[internal] set root home dir to /home/envd".into(),
                ),
                (
                    format!("sed -i \"s/envd:x:{ROOT_ALIAS_ID}/envd:x:0/g\" /etc/group"),
                    "[internal] set envd group to 0 as root group".into(),
                ),
            ]
        } else {
            vec![
                (
                    format!("groupadd -g {} envd", identity.gid),
                    format!("[internal] create user group envd(g:{})", identity.gid),
                ),
                (
                    format!("useradd -p \"\" -u {} -g envd -s /bin/sh -m envd", identity.uid),
                    format!("[internal] create user envd(u:{})", identity.uid),
                ),
                (
                    "usermod -a -G sudo envd".into(),
                    "[internal] add user envd to sudoers".into(),
                ),
                (
                    format!(
                        "install -d -o envd -g {} -m 0700 /home/envd/.config /home/envd/.cache",
                        identity.gid
                    ),
                    "[internal] mkdir config and cache".into(),
                ),
            ]
        };
        tracing::debug!(uid = identity.uid, gid = identity.gid, "create user envd");
        steps.into_iter().fold(root, |state, (command, name)| {
            state.run(Run::sh(command).custom_name(name))
        })
    }

    /// Hands every recorded directory to `envd` and switches to that user.
    pub(crate) fn compile_user_own(&mut self, root: State) -> State {
        if self.identity.is_root() {
            let _ = self
                .graph
                .runtime
                .environ
                .insert("USER".into(), "root".into());
            return root;
        }
        let _ = self
            .graph
            .runtime
            .environ
            .insert("USER".into(), ENVD_USER.into());
        self.graph.user = ENVD_USER.into();

        let mut state = root;
        for dir in &self.graph.user_directories {
            state = state.run(
                Run::new(["chown", "-R", "envd:envd", dir.as_str()])
                    .custom_name(format!("[internal] configure user permissions for {dir}")),
            );
        }
        // the environment is set again for the new user
        let mut user = state.with_user(ENVD_USER);
        for (key, value) in BASE_ENVIRONMENT {
            user = user.with_env(*key, *value);
        }
        self.apply_env_path(user)
    }
}
