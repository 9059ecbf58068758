//! oh-my-zsh checkout kept in the cache dir.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use envd_common::error::{EnvdError, Result};
use gix::remote::fetch::Shallow;

const OH_MY_ZSH_REPO: &str = "https://github.com/ohmyzsh/ohmyzsh.git";

/// Name of the checkout under the cache dir.
pub const OH_MY_ZSH_DIR: &str = "oh-my-zsh";

fn failed(reason: impl std::fmt::Display) -> EnvdError {
    EnvdError::ToolDownloadFailed {
        tool: "oh-my-zsh".into(),
        reason: reason.to_string(),
    }
}

/// Makes `<cache_dir>/oh-my-zsh` available, returning `true` if it already was.
///
/// # Errors
///
/// Returns [`EnvdError::ToolDownloadFailed`] if the clone or checkout fails.
pub fn ensure_oh_my_zsh(cache_dir: &Path) -> Result<bool> {
    let target: PathBuf = cache_dir.join(OH_MY_ZSH_DIR);
    if target.join(".git").exists() {
        tracing::debug!(path = %target.display(), "oh-my-zsh is cached");
        return Ok(true);
    }
    if target.exists() {
        std::fs::remove_dir_all(&target).map_err(|e| EnvdError::Io {
            path: target.clone(),
            source: e,
        })?;
    }
    tracing::info!(url = OH_MY_ZSH_REPO, path = %target.display(), "clone oh-my-zsh");
    shallow_clone(OH_MY_ZSH_REPO, &target)?;
    Ok(false)
}

/// Clones the tip of `url` into `dest` and checks out its worktree.
fn shallow_clone(url: &str, dest: &Path) -> Result<()> {
    let depth = NonZeroU32::MIN;
    let mut prepared = gix::prepare_clone(url, dest)
        .map_err(failed)?
        .with_shallow(Shallow::DepthAtRemote(depth));
    let (mut checkout, _outcome) = prepared
        .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(failed)?;
    let (_repo, _outcome) = checkout
        .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_checkout_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(OH_MY_ZSH_DIR).join(".git")).expect("mkdir");
        assert!(ensure_oh_my_zsh(dir.path()).expect("cached"));
        assert!(!dir.path().join(OH_MY_ZSH_DIR).join("README.md").exists());
    }
}
