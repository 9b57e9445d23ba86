//! Simplified access-control-list overlay on a container's extended
//! attributes (spec §4.6 step 6 "combines ACL and POSIX permissions").
//!
//! The source's full ACL grammar (`u:`, `g:`, `egroup:` entries with
//! per-letter flags, inherited vs. one-shot, sys vs. user attribute)
//! is a large surface of its own and out of this core's scope; this
//! models only what the open front-end actually consults: per-uid and
//! per-gid read/write grants, plus a write-once flag, stored under the
//! `sys.acl` extended attribute as comma-separated entries
//! `u:<uid>:rw`, `g:<gid>:rw`, `z:wo`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct AclGrant {
    pub read: bool,
    pub write: bool,
}

/// Parsed `sys.acl` value. Absence of the attribute parses to an empty,
/// all-deny ACL that defers entirely to the POSIX mode check.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    by_uid: HashMap<u32, AclGrant>,
    by_gid: HashMap<u32, AclGrant>,
    /// `z:wo` — forbids overwriting an existing file, but not creating
    /// a new one (spec §4.6 step 6 "write-once ACL flag").
    pub write_once: bool,
}

impl Acl {
    pub fn parse(xattrs: &HashMap<String, String>) -> Self {
        let mut acl = Acl::default();
        let Some(value) = xattrs.get("sys.acl") else { return acl };
        for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("u"), Some(id), Some(perm)) => {
                    if let Ok(uid) = id.parse() {
                        acl.by_uid.insert(uid, grant_from(perm));
                    }
                }
                (Some("g"), Some(id), Some(perm)) => {
                    if let Ok(gid) = id.parse() {
                        acl.by_gid.insert(gid, grant_from(perm));
                    }
                }
                (Some("z"), Some("wo"), None) => acl.write_once = true,
                _ => {}
            }
        }
        acl
    }

    pub fn grants_read(&self, uid: u32, gid: u32) -> bool {
        self.by_uid.get(&uid).map(|g| g.read).unwrap_or(false) || self.by_gid.get(&gid).map(|g| g.read).unwrap_or(false)
    }

    pub fn grants_write(&self, uid: u32, gid: u32) -> bool {
        self.by_uid.get(&uid).map(|g| g.write).unwrap_or(false) || self.by_gid.get(&gid).map(|g| g.write).unwrap_or(false)
    }
}

fn grant_from(perm: &str) -> AclGrant {
    AclGrant { read: perm.contains('r'), write: perm.contains('w') }
}
