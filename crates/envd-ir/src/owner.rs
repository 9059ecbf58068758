//! Resolution of the identity owning generated files.

use envd_common::error::{EnvdError, Result};
use envd_common::types::Identity;

/// Group ID of `staff` on macOS, already taken by `dialout` in Ubuntu images.
const MACOS_STAFF_GID: u32 = 20;

/// Parses an owner flag of the form `uid` or `uid:gid`.
///
/// # Errors
///
/// Returns [`EnvdError::InvalidOwnerFormat`] for more than two parts or
/// non-numeric IDs.
pub fn parse_owner(value: &str) -> Result<Identity> {
    let invalid = || EnvdError::InvalidOwnerFormat {
        value: value.to_string(),
    };
    let ids: Vec<&str> = value.split(':').collect();
    let parse = |id: &str| id.trim().parse::<u32>().map_err(|_| invalid());
    match *ids.as_slice() {
        [uid] => {
            let uid = parse(uid)?;
            tracing::debug!(uid, "gid is omitted, using the uid");
            Ok(Identity::new(uid, uid))
        }
        [uid, gid] => Ok(Identity::new(parse(uid)?, parse(gid)?)),
        _ => Err(invalid()),
    }
}

/// Resolves the owning identity.
///
/// The owner flag wins over the identity configured on the graph, which
/// wins over the identity of the current process.
///
/// # Errors
///
/// Returns [`EnvdError::InvalidOwnerFormat`] if the flag is malformed.
pub fn resolve_identity(flag: Option<&str>, configured: Option<Identity>) -> Result<Identity> {
    if let Some(flag) = flag.filter(|f| !f.is_empty()) {
        tracing::debug!(flag, "use owner flag");
        return parse_owner(flag);
    }
    if let Some(identity) = configured {
        return Ok(identity);
    }
    let current = Identity::new(
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    );
    Ok(replace_reserved_gid(current, std::env::consts::OS))
}

/// Replaces the macOS `staff` group with the uid.
#[must_use]
pub fn replace_reserved_gid(identity: Identity, os: &str) -> Identity {
    if os == "macos" && identity.gid == MACOS_STAFF_GID {
        Identity::new(identity.uid, identity.uid)
    } else {
        identity
    }
}
