use crate::backend::error::SignerError;
use crate::backend::signer::Signer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One authenticated caller for the duration of a single request.
pub struct Session {
    pub username: String,
    signer: Arc<dyn Signer>,
}

impl Session {
    pub fn new(username: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        Self { username: username.into(), signer }
    }

    pub async fn resolve_identity(&self) -> Result<String, SignerError> {
        self.signer.address().await
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }
}

/// A username is used as a directory name under the upload root, so it must
/// be exactly one plain path segment.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name != "."
        && name != ".."
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Serializes pipeline runs per identity so two events for the same user
/// cannot interleave their pointer read and record write.
#[derive(Clone, Default)]
pub struct IdentityLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

pub struct IdentityGuard {
    identity: String,
    locks: IdentityLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, identity: &str) -> IdentityGuard {
        let key = identity.to_ascii_lowercase();
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // A waiter cancelled after the holder released leaves an entry
            // only the map references.
            map.retain(|k, l| *k == key || Arc::strong_count(l) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        IdentityGuard { identity: key, locks: self.clone(), guard: Some(guard) }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map itself still holds the lock: nobody is waiting.
        if map.get(&self.identity).map_or(false, |l| Arc::strong_count(l) == 1) {
            map.remove(&self.identity);
        }
    }
}
