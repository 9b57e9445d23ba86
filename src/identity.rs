//! Client identity translation (spec §4.6 step 1: "Translate client
//! credentials to an internal identity").
//!
//! The actual credential exchange (GSI, unix, sss, ...) is a property
//! of the messaging-bus transport and out of scope (spec §1); this
//! type is what the redirecting open front-end and the proc interface
//! consume once that translation has already happened.

use crate::config::ProcAuth;

/// An authenticated client, already mapped from whatever wire identity
/// the transport carried to uid/gid/groups.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub uid: u32,
    pub gid: u32,
    pub group_names: Vec<String>,
    /// e.g. `"unix"`, `"sss"`, `"gsi"`, `"krb5"`.
    pub auth_protocol: String,
    pub sudoer: bool,
    pub host: String,
}

impl ClientIdentity {
    pub fn root(host: impl Into<String>) -> Self {
        Self { uid: 0, gid: 0, group_names: Vec::new(), auth_protocol: "unix".into(), sudoer: false, host: host.into() }
    }

    /// `/proc/admin/` gate (spec §6: "requires uid 0 or membership in a
    /// configured admin group, or the `sss` transport with the daemon
    /// uid"), grounded on `ProcInterface::Authorize`'s handling of
    /// `/proc/admin/`.
    pub fn authorizes_admin(&self, auth: &ProcAuth) -> bool {
        if self.uid == 0 {
            return true;
        }
        if self.auth_protocol == "sss" {
            if let Some(daemon_uid) = auth.sss_daemon_uid {
                if self.uid == daemon_uid {
                    return true;
                }
            }
        }
        self.group_names.iter().any(|name| auth.admin_groups.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> ProcAuth {
        ProcAuth { admin_groups: vec!["adm".to_string()], sss_daemon_uid: Some(2) }
    }

    #[test]
    fn root_is_always_admin() {
        let identity = ClientIdentity::root("client1");
        assert!(identity.authorizes_admin(&auth()));
    }

    #[test]
    fn sss_daemon_uid_is_admin() {
        let identity = ClientIdentity { uid: 2, gid: 0, group_names: vec![], auth_protocol: "sss".into(), sudoer: false, host: "h".into() };
        assert!(identity.authorizes_admin(&auth()));
    }

    #[test]
    fn plain_unix_daemon_uid_is_not_admin() {
        let identity = ClientIdentity { uid: 2, gid: 0, group_names: vec![], auth_protocol: "unix".into(), sudoer: false, host: "h".into() };
        assert!(!identity.authorizes_admin(&auth()));
    }

    #[test]
    fn admin_group_membership_grants_access() {
        let identity = ClientIdentity { uid: 500, gid: 500, group_names: vec!["adm".into()], auth_protocol: "unix".into(), sudoer: false, host: "h".into() };
        assert!(identity.authorizes_admin(&auth()));
    }

    #[test]
    fn unprivileged_user_is_rejected() {
        let identity = ClientIdentity { uid: 500, gid: 500, group_names: vec![], auth_protocol: "unix".into(), sudoer: false, host: "h".into() };
        assert!(!identity.authorizes_admin(&auth()));
    }
}
