//! Symmetric key store backing the Capability Engine (spec §4.7 "Key
//! rotation: the engine keeps a key store; tokens reference the key id
//! so rotation does not invalidate outstanding tokens immediately").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use rand::RngCore;

/// Identifies a symmetric key; this is the `cap.sym` opaque field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(pub u32);

struct Inner {
    keys: HashMap<u32, Vec<u8>>,
    current: AtomicU32,
}

/// Retains every key ever minted so capabilities signed under a
/// superseded key id keep verifying until they naturally expire.
pub struct KeyStore {
    inner: RwLock<Inner>,
}

impl KeyStore {
    pub fn new_with_random_key() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new_with_key(1, key)
    }

    pub fn new_with_key(id: u32, key: Vec<u8>) -> Self {
        let mut keys = HashMap::new();
        keys.insert(id, key);
        Self { inner: RwLock::new(Inner { keys, current: AtomicU32::new(id) }) }
    }

    /// Generates a new key and makes it current; old keys remain
    /// resolvable.
    pub fn rotate(&self) -> KeyId {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let mut inner = self.inner.write().unwrap();
        let next_id = inner.keys.keys().copied().max().unwrap_or(0) + 1;
        inner.keys.insert(next_id, key);
        inner.current.store(next_id, Ordering::SeqCst);
        KeyId(next_id)
    }

    pub fn current(&self) -> (KeyId, Vec<u8>) {
        let inner = self.inner.read().unwrap();
        let id = inner.current.load(Ordering::SeqCst);
        (KeyId(id), inner.keys.get(&id).expect("current key always present").clone())
    }

    pub fn get(&self, id: KeyId) -> Option<Vec<u8>> {
        self.inner.read().unwrap().keys.get(&id.0).cloned()
    }
}
