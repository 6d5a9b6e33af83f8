//! Per-contact serialization.
//!
//! One async mutex per `(agent_id, phone)`. The map itself is only locked
//! long enough to fetch or create an entry, so different contacts never wait
//! on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type Key = (String, String);

#[derive(Default)]
pub struct ContactLocks {
    inner: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl ContactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one contact.
    pub async fn acquire(&self, agent_id: &str, phone: &str) -> ContactGuard {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Drop entries nobody holds before adding a new one.
            if map.len() > 1024 {
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            map.entry((agent_id.to_string(), phone.to_string()))
                .or_default()
                .clone()
        };
        ContactGuard {
            _guard: lock.lock_owned().await,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the whole read-modify-write cycle of one contact.
pub struct ContactGuard {
    _guard: OwnedMutexGuard<()>,
}
