//! Capability Engine (spec §4.7): signed envelopes authorizing one
//! operation on one file for one or more file systems, encoded as the
//! `key=value&...` opaque string a client carries back to an FST.

pub mod keystore;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{MgmError, MgmResult};

pub use keystore::{KeyId, KeyStore};

/// `mgm.access` values (spec §3 "Capability").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Create,
    Update,
    Delete,
}

impl AccessMode {
    fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Create => "create",
            AccessMode::Update => "update",
            AccessMode::Delete => "delete",
        }
    }

    fn parse(s: &str) -> MgmResult<Self> {
        match s {
            "read" => Ok(AccessMode::Read),
            "create" => Ok(AccessMode::Create),
            "update" => Ok(AccessMode::Update),
            "delete" => Ok(AccessMode::Delete),
            other => Err(MgmError::invalid(format!("unknown mgm.access value {other}"))),
        }
    }
}

/// One replica target: `mgm.url<i>`, `mgm.fsid<i>`, `mgm.localprefix<i>`.
#[derive(Debug, Clone)]
pub struct ReplicaTarget {
    pub fs_id: u32,
    pub host: String,
    pub port: u16,
    pub local_prefix: String,
}

/// The full set of bindings a capability carries (spec §3, §6
/// "Capability opaque fields").
#[derive(Debug, Clone)]
pub struct CapabilityBindings {
    pub access: AccessMode,
    pub layout_id: u32,
    pub container_id: u64,
    pub ruid: u32,
    pub rgid: u32,
    pub uid: u32,
    pub gid: u32,
    pub path: String,
    pub manager: String,
    pub file_id: u64,
    pub booking_size: u64,
    pub fs_id: u32,
    pub local_prefix: String,
    pub replicas: Vec<ReplicaTarget>,
}

/// A signed, still-opaque capability, good from `issued_at` for
/// `validity`.
pub struct Capability {
    pub bindings: CapabilityBindings,
    pub key_id: KeyId,
    pub issued_at: SystemTime,
    pub validity: Duration,
    pub signature_hex: String,
}

type HmacSha256 = Hmac<Sha256>;

/// Maximum encoded-and-signed size (spec §6: "The full signed string
/// must not exceed 2048 bytes").
pub const MAX_OPAQUE_BYTES: usize = 2048;

fn epoch_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Builds the `key=value&...` string that gets signed (everything
/// except `cap.sym`/`cap.msg`, which are appended after signing).
fn encode_bindings(bindings: &CapabilityBindings, issued_at: SystemTime, validity: Duration) -> String {
    let mut parts = vec![
        format!("mgm.access={}", bindings.access.as_str()),
        format!("mgm.lid={}", bindings.layout_id),
        format!("mgm.cid={}", bindings.container_id),
        format!("mgm.ruid={}", bindings.ruid),
        format!("mgm.rgid={}", bindings.rgid),
        format!("mgm.uid={}", bindings.uid),
        format!("mgm.gid={}", bindings.gid),
        format!("mgm.path={}", bindings.path),
        format!("mgm.manager={}", bindings.manager),
        format!("mgm.fid={:x}", bindings.file_id),
        format!("mgm.bookingsize={}", bindings.booking_size),
        format!("mgm.fsid={}", bindings.fs_id),
        format!("mgm.localprefix={}", bindings.local_prefix),
        format!("mgm.issued={}", epoch_seconds(issued_at)),
        format!("mgm.validity={}", validity.as_secs()),
    ];
    for (i, replica) in bindings.replicas.iter().enumerate() {
        parts.push(format!("mgm.url{i}=root://{}:{}//", replica.host, replica.port));
        parts.push(format!("mgm.fsid{i}={}", replica.fs_id));
        parts.push(format!("mgm.localprefix{i}={}", replica.local_prefix));
    }
    parts.join("&")
}

/// Mints and verifies capabilities against a rotating [`KeyStore`].
pub struct CapabilityEngine {
    keys: KeyStore,
    validity: Duration,
}

impl CapabilityEngine {
    pub fn new(keys: KeyStore, validity: Duration) -> Self {
        Self { keys, validity }
    }

    /// Signs `bindings` with the current key (spec §4.7 "Creates a
    /// signed envelope... carries a timestamp; validity is `issue +
    /// configured window`").
    pub fn mint(&self, bindings: CapabilityBindings) -> MgmResult<Capability> {
        let (key_id, key) = self.keys.current();
        let issued_at = SystemTime::now();
        let payload = encode_bindings(&bindings, issued_at, self.validity);
        let signature_hex = sign(&key, &payload);

        let cap = Capability { bindings, key_id, issued_at, validity: self.validity, signature_hex };
        let encoded = cap.encode();
        if encoded.len() > MAX_OPAQUE_BYTES {
            return Err(MgmError::invalid("signed capability exceeds 2048 bytes"));
        }
        Ok(cap)
    }

    /// Verifies a previously-minted capability: recomputes the
    /// signature with the key referenced by `cap.sym` and checks
    /// expiry (spec §4.7 "A file-system verifies by recomputing the
    /// signature with the named key and rejects on expiry").
    pub fn verify(&self, cap: &Capability) -> MgmResult<()> {
        let Some(key) = self.keys.get(cap.key_id) else {
            return Err(MgmError::token_expired("signing key no longer available"));
        };
        let payload = encode_bindings(&cap.bindings, cap.issued_at, cap.validity);
        let expected = sign(&key, &payload);
        if expected != cap.signature_hex {
            return Err(MgmError::permission_denied("capability signature mismatch"));
        }
        let age = SystemTime::now().duration_since(cap.issued_at).unwrap_or_default();
        if age > cap.validity {
            return Err(MgmError::token_expired("capability past its validity window"));
        }
        Ok(())
    }
}

fn sign(key: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

impl Capability {
    /// Full opaque string: signed bindings plus `cap.sym`/`cap.msg`
    /// (spec §6).
    pub fn encode(&self) -> String {
        let payload = encode_bindings(&self.bindings, self.issued_at, self.validity);
        format!("{payload}&cap.sym={}&cap.msg={}", self.key_id.0, self.signature_hex)
    }

    pub fn access(&self) -> AccessMode {
        self.bindings.access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> CapabilityBindings {
        CapabilityBindings {
            access: AccessMode::Read,
            layout_id: 42,
            container_id: 7,
            ruid: 100,
            rgid: 100,
            uid: 100,
            gid: 100,
            path: "/eos/user/f".into(),
            manager: "mgm1:1094".into(),
            file_id: 0xdead_beef,
            booking_size: 4096,
            fs_id: 1,
            local_prefix: "/data/1/".into(),
            replicas: vec![ReplicaTarget { fs_id: 1, host: "fst1".into(), port: 1095, local_prefix: "/data/1/".into() }],
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let keys = KeyStore::new_with_random_key();
        let engine = CapabilityEngine::new(keys, Duration::from_secs(60));
        let cap = engine.mint(bindings()).unwrap();
        engine.verify(&cap).unwrap();
    }

    #[test]
    fn expired_capability_is_rejected() {
        let keys = KeyStore::new_with_random_key();
        let engine = CapabilityEngine::new(keys, Duration::from_secs(0));
        let mut cap = engine.mint(bindings()).unwrap();
        cap.issued_at = SystemTime::now() - Duration::from_secs(10);
        let err = engine.verify(&cap).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TokenExpired);
    }

    #[test]
    fn rotating_the_key_does_not_invalidate_outstanding_tokens() {
        let keys = KeyStore::new_with_random_key();
        let engine = CapabilityEngine::new(keys, Duration::from_secs(60));
        let cap = engine.mint(bindings()).unwrap();
        engine.keys.rotate();
        // The old key id is still resolvable (spec §4.7 "tokens
        // reference the key id so rotation does not invalidate
        // outstanding tokens immediately").
        engine.verify(&cap).unwrap();
    }

    #[test]
    fn tampering_with_a_binding_breaks_the_signature() {
        let keys = KeyStore::new_with_random_key();
        let engine = CapabilityEngine::new(keys, Duration::from_secs(60));
        let mut cap = engine.mint(bindings()).unwrap();
        cap.bindings.booking_size = 999_999;
        let err = engine.verify(&cap).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);
    }

    #[test]
    fn encoded_capability_stays_within_size_cap() {
        let keys = KeyStore::new_with_random_key();
        let engine = CapabilityEngine::new(keys, Duration::from_secs(60));
        let cap = engine.mint(bindings()).unwrap();
        assert!(cap.encode().len() <= MAX_OPAQUE_BYTES);
    }
}
