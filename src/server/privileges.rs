//! Dropping root privileges at startup

use crate::error::{Error, Result};
use nix::unistd::{Gid, Uid, User, geteuid, setgid, setgroups, setuid};

/// What happened to the process identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeChange {
    /// Switched from root to this user
    Dropped { user: String, uid: Uid, gid: Gid },
    /// Not running as root, or no user configured
    Unchanged,
}

impl std::fmt::Display for PrivilegeChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivilegeChange::Dropped { user, uid, gid } => {
                write!(f, "Privileges dropped from root to {} (uid {}, gid {}).", user, uid, gid)
            }
            PrivilegeChange::Unchanged => write!(f, "Not root, privileges unchanged."),
        }
    }
}

/// If running as root, become `user`
///
/// Supplementary groups are cleared, then gid and uid are set, in that order.
pub fn drop_to(user: &str) -> Result<PrivilegeChange> {
    if !geteuid().is_root() || user.is_empty() {
        return Ok(PrivilegeChange::Unchanged);
    }

    let account = User::from_name(user)
        .map_err(|source| Error::PrivilegeDrop {
            user: user.to_string(),
            source,
        })?
        .ok_or_else(|| Error::UnknownUser(user.to_string()))?;

    let fail = |source| Error::PrivilegeDrop {
        user: user.to_string(),
        source,
    };

    setgroups(&[]).map_err(fail)?;
    setgid(account.gid).map_err(fail)?;
    setuid(account.uid).map_err(fail)?;

    Ok(PrivilegeChange::Dropped {
        user: user.to_string(),
        uid: account.uid,
        gid: account.gid,
    })
}
