use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::{Map, MapEntry, storage::StorageError};

// OVERLAY
// ================================================================================================

/// Values a version held before a newer version overwrote them in the shared data source.
///
/// `None` records that the key did not exist in the version. The writer fills an overlay, first
/// write wins, while holding its write lock and before it applies a commit. Readers hold the
/// read lock while they look up the overlay and then the data source, so they never observe a
/// newer commit without its preserved values.
#[derive(Debug)]
pub(super) struct Overlay<K, V> {
    entries: RwLock<Map<K, Option<V>>>,
}

impl<K: Ord, V> Overlay<K, V> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Map::new()) }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Map<K, Option<V>>>, StorageError> {
        Ok(self.entries.read()?)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Map<K, Option<V>>>, StorageError> {
        Ok(self.entries.write()?)
    }
}

// ANCESTORS
// ================================================================================================

/// Weak handles to the overlays of every older version which is still alive.
#[derive(Debug)]
pub(super) struct Ancestors<K, V> {
    overlays: Vec<Weak<Overlay<K, V>>>,
}

impl<K: Ord + Clone, V: Clone> Ancestors<K, V> {
    pub fn new() -> Self {
        Self { overlays: Vec::new() }
    }

    /// Ancestors of a version copied from a version with these ancestors and `parent`'s overlay.
    pub fn inherit(&self, parent: &Arc<Overlay<K, V>>) -> Self {
        let mut overlays: Vec<_> =
            self.overlays.iter().filter(|overlay| overlay.strong_count() > 0).cloned().collect();
        overlays.push(Arc::downgrade(parent));
        Self { overlays }
    }

    /// Drops handles to released versions and returns the live overlays.
    pub fn live(&mut self) -> Vec<Arc<Overlay<K, V>>> {
        self.overlays.retain(|overlay| overlay.strong_count() > 0);
        self.overlays.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Write access to a set of overlays for the duration of one commit.
pub(super) struct Preserver<'a, K, V> {
    guards: Vec<RwLockWriteGuard<'a, Map<K, Option<V>>>>,
}

impl<'a, K: Ord + Clone, V: Clone> Preserver<'a, K, V> {
    pub fn lock(overlays: &'a [Arc<Overlay<K, V>>]) -> Result<Self, StorageError> {
        let guards = overlays.iter().map(|overlay| overlay.write()).collect::<Result<_, _>>()?;
        Ok(Self { guards })
    }

    /// Returns true if some overlay has no entry for `key` yet.
    pub fn needs(&self, key: &K) -> bool {
        self.guards.iter().any(|entries| !entries.contains_key(key))
    }

    /// Records `old` as the value of `key` in every overlay which does not know the key yet.
    pub fn preserve(&mut self, key: &K, old: Option<V>) {
        for entries in self.guards.iter_mut() {
            if let MapEntry::Vacant(entry) = entries.entry(key.clone()) {
                entry.insert(old.clone());
            }
        }
    }
}
