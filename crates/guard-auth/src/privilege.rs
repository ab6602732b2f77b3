//! Privilege phases as types.
//!
//! ```text
//! PrivilegeGuard<Elevated> ──drop_privileges()──▶ PrivilegeGuard<Dropped>
//!   backend initialization                       prompt surfaces
//! ```
//!
//! There is no way back from `Dropped`, and no way to build a `Dropped`
//! guard except by consuming an `Elevated` one.

use std::io;
use std::marker::PhantomData;

use tracing::{debug, info};

use crate::error::PrivilegeError;

/// Phase before the drop. Backend setup may read root-only files.
#[derive(Debug)]
pub struct Elevated;

/// Phase after the drop. User interaction is allowed.
#[derive(Debug)]
pub struct Dropped;

/// The process's user and group ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIds {
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub egid: u32,
}

impl ProcessIds {
    /// Reads the current ids.
    pub fn current() -> Self {
        // SAFETY: these calls have no preconditions and cannot fail.
        unsafe {
            Self {
                uid: libc::getuid(),
                euid: libc::geteuid(),
                gid: libc::getgid(),
                egid: libc::getegid(),
            }
        }
    }

    /// True when effective ids differ from the real ones.
    pub fn is_setid(&self) -> bool {
        self.uid != self.euid || self.gid != self.egid
    }
}

/// Proof of the process's privilege phase.
#[derive(Debug)]
pub struct PrivilegeGuard<P> {
    ids: ProcessIds,
    _phase: PhantomData<P>,
}

impl<P> PrivilegeGuard<P> {
    /// Ids at the time the guard was created.
    pub fn ids(&self) -> ProcessIds {
        self.ids
    }
}

impl PrivilegeGuard<Elevated> {
    /// Captures the starting privileges. Call once, first thing in `main`.
    pub fn acquire() -> Self {
        let ids = ProcessIds::current();
        debug!(
            uid = ids.uid,
            euid = ids.euid,
            gid = ids.gid,
            egid = ids.egid,
            "Starting privileges"
        );
        Self {
            ids,
            _phase: PhantomData,
        }
    }

    /// Permanently switches to the real user and group.
    ///
    /// Clears supplementary groups, sets the gid then the uid, and checks
    /// that the effective ids now equal the real ones and that root
    /// cannot be regained.
    pub fn drop_privileges(self) -> Result<PrivilegeGuard<Dropped>, PrivilegeError> {
        let ProcessIds { uid, gid, euid, .. } = self.ids;

        if euid == 0 {
            // SAFETY: `gid` lives on the stack for the duration of the call.
            let rc = unsafe { libc::setgroups(1, &gid) };
            if rc != 0 {
                return Err(PrivilegeError::SetGroups(io::Error::last_os_error()));
            }
        }

        // SAFETY: plain syscall on integer arguments.
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(PrivilegeError::SetGid {
                gid,
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: plain syscall on integer arguments.
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(PrivilegeError::SetUid {
                uid,
                source: io::Error::last_os_error(),
            });
        }

        let now = ProcessIds::current();
        if now.is_setid() {
            return Err(PrivilegeError::StillPrivileged {
                uid: now.uid,
                euid: now.euid,
                gid: now.gid,
                egid: now.egid,
            });
        }

        // SAFETY: plain syscall; expected to fail for non-root users.
        if now.uid != 0 && unsafe { libc::setuid(0) } == 0 {
            return Err(PrivilegeError::RegainedRoot);
        }

        info!(uid = now.uid, gid = now.gid, "Dropped privileges");
        Ok(PrivilegeGuard {
            ids: now,
            _phase: PhantomData,
        })
    }
}

impl PrivilegeGuard<Dropped> {
    /// Re-checks at runtime that nothing re-acquired privileges.
    pub fn verify(&self) -> Result<(), PrivilegeError> {
        let now = ProcessIds::current();
        if now.is_setid() {
            return Err(PrivilegeError::StillPrivileged {
                uid: now.uid,
                euid: now.euid,
                gid: now.gid,
                egid: now.egid,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_leaves_real_ids() {
        let elevated = PrivilegeGuard::acquire();
        let before = elevated.ids();

        let dropped = elevated.drop_privileges().unwrap();
        let after = dropped.ids();

        assert_eq!(after.uid, before.uid);
        assert_eq!(after.euid, after.uid);
        assert_eq!(after.egid, after.gid);
        assert!(dropped.verify().is_ok());
    }
}
