//! Entry store seam.
//!
//! The engine reads account state through [`EntryStore::get`] and hands back
//! ordered mutation batches. [`InMemoryStore`] is a complete implementation
//! for embedding and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dn;
use crate::error::{PolicyError, PolicyResult};
use crate::state::{AccountState, Mutation};

/// Where a batch of state changes is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    /// Straight into the local store.
    Local,
    /// To the provider this store replicates from.
    Forward,
}

pub trait EntryStore: Send + Sync {
    /// Reads the entry for `ndn` (a normalized DN). The returned state is an
    /// owned copy; nothing stays borrowed from the store.
    fn get(&self, ndn: &str) -> PolicyResult<Option<AccountState>>;

    /// Applies `mutations` in order as a single all-or-nothing write.
    fn apply_mutations(&self, ndn: &str, mutations: &[Mutation], route: WriteRoute) -> PolicyResult<()>;

    /// Whether this store is a read-only copy of another directory.
    fn is_shadow(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, AccountState>>,
    shadow: bool,
    fail_writes: AtomicBool,
    last_route: Mutex<Option<WriteRoute>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports itself as a replica.
    pub fn shadow() -> Self {
        Self {
            shadow: true,
            ..Self::default()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, AccountState>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, AccountState>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Inserts or replaces an entry, keyed by its normalized DN.
    pub fn insert(&self, state: AccountState) {
        let key = dn::normalize_lossy(&state.dn);
        self.write().insert(key, state);
    }

    pub fn remove(&self, dn: &str) -> Option<AccountState> {
        self.write().remove(&dn::normalize_lossy(dn))
    }

    /// Makes every following write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Route of the most recent successful write.
    pub fn last_route(&self) -> Option<WriteRoute> {
        match self.last_route.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl EntryStore for InMemoryStore {
    fn get(&self, ndn: &str) -> PolicyResult<Option<AccountState>> {
        Ok(self.read().get(&dn::normalize_lossy(ndn)).cloned())
    }

    fn apply_mutations(&self, ndn: &str, mutations: &[Mutation], route: WriteRoute) -> PolicyResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PolicyError::Store(format!("write to {ndn} refused")));
        }
        let key = dn::normalize_lossy(ndn);
        let mut entries = self.write();
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| PolicyError::Store(format!("no entry {ndn}")))?;
        // mutations apply to a copy first so a batch lands whole
        let mut next = entry.clone();
        next.apply(mutations);
        *entry = next;
        drop(entries);

        match self.last_route.lock() {
            Ok(mut guard) => *guard = Some(route),
            Err(poisoned) => *poisoned.into_inner() = Some(route),
        }
        Ok(())
    }

    fn is_shadow(&self) -> bool {
        self.shadow
    }
}
