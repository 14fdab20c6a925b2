//! Key/value storage underneath the keeper.
//!
//! The consensus-replicated store is modelled as an ordered byte map ([KvStore]). [MemStore]
//! is the committed root and keeps a copy of every committed version so queries can pin a
//! height; [CacheStore] buffers writes over a parent and flushes them only when told to,
//! which is how a transaction's writes are kept or thrown away as a unit.
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use sha3::Digest;

use crate::common::{Addr, Hash};

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn set(&mut self, key: &[u8], value: Vec<u8>);
    fn delete(&mut self, key: &[u8]);
    /// All entries whose key starts with `prefix`, in key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }
}

fn prefix_range(
    prefix: &[u8],
) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    // the smallest key greater than every key having `prefix`
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return (Bound::Included(prefix.to_vec()), Bound::Excluded(end))
        }
    }
    (Bound::Included(prefix.to_vec()), Bound::Unbounded)
}

#[derive(Clone, Default, Debug)]
pub struct MemStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    versions: BTreeMap<u64, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current contents as `version` and return their
    /// commitment hash.
    pub fn commit(&mut self, version: u64) -> Hash {
        let hash = Self::root_of(&self.data);
        self.versions.insert(version, self.data.clone());
        debug!("committed version {} (hash = {})", version, hash);
        hash
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.versions.keys().next_back().copied()
    }

    /// A read-only copy of the store as it was committed at `version`.
    pub fn at_version(&self, version: u64) -> Option<MemStore> {
        self.versions.get(&version).map(|data| MemStore {
            data: data.clone(),
            versions: BTreeMap::new(),
        })
    }

    pub fn root_hash(&self) -> Hash {
        Self::root_of(&self.data)
    }

    fn root_of(data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Hash {
        let mut hasher = sha3::Keccak256::new();
        for (k, v) in data.iter() {
            hasher.update((k.len() as u64).to_be_bytes());
            hasher.update(k);
            hasher.update((v.len() as u64).to_be_bytes());
            hasher.update(v);
        }
        Hash::from_slice(hasher.finalize().as_slice())
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.data.insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.data.remove(key);
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .range(prefix_range(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Write buffer over a parent store. `None` marks a deletion.
pub struct CacheStore {
    parent: StoreHandle,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl CacheStore {
    pub fn new(parent: StoreHandle) -> Self {
        Self {
            parent,
            writes: BTreeMap::new(),
        }
    }

    /// Flush the buffered writes into the parent.
    pub fn write(&mut self) {
        let writes = std::mem::take(&mut self.writes);
        let mut parent = self.parent.0.write();
        for (k, v) in writes.into_iter() {
            match v {
                Some(v) => parent.set(&k, v),
                None => parent.delete(&k),
            }
        }
    }

    pub fn discard(&mut self) {
        self.writes.clear()
    }
}

impl KvStore for CacheStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(v) => v.clone(),
            None => self.parent.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.iter_prefix(prefix).into_iter().collect();
        for (k, v) in self.writes.range(prefix_range(prefix)) {
            match v {
                Some(v) => merged.insert(k.clone(), v.clone()),
                None => merged.remove(k),
            };
        }
        merged.into_iter().collect()
    }
}

/// Shared handle to a store. Cloning the handle shares the store.
#[derive(Clone)]
pub struct StoreHandle(Arc<RwLock<dyn KvStore>>);

impl StoreHandle {
    pub fn new<S: KvStore + 'static>(store: S) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    pub fn from_shared(store: Arc<RwLock<dyn KvStore>>) -> Self {
        Self(store)
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.read().get(key)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.read().has(key)
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>) {
        self.0.write().set(key, value)
    }

    pub fn delete(&self, key: &[u8]) {
        self.0.write().delete(key)
    }

    pub fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.0.read().iter_prefix(prefix)
    }

    /// Open a write buffer on top of this store.
    pub fn branch(&self) -> Branch {
        Branch(Arc::new(RwLock::new(CacheStore::new(self.clone()))))
    }
}

/// A [CacheStore] that is handed out as a [StoreHandle] while the owner
/// keeps the right to flush it.
pub struct Branch(Arc<RwLock<CacheStore>>);

impl Branch {
    pub fn handle(&self) -> StoreHandle {
        StoreHandle(self.0.clone())
    }

    pub fn write(self) {
        self.0.write().write()
    }
}

/// Key layout of the persisted state.
pub mod keys {
    use super::*;

    pub const PREFIX_BLOCK_HASH: u8 = 0x01;
    pub const PREFIX_HEIGHT_HASH: u8 = 0x02;
    pub const PREFIX_BLOOM: u8 = 0x03;
    pub const PREFIX_LOGS: u8 = 0x04;
    pub const PREFIX_CODE: u8 = 0x05;
    pub const PREFIX_STORAGE: u8 = 0x06;
    pub const PREFIX_CHAIN_CONFIG: u8 = 0x07;
    pub const PREFIX_PARAMS: u8 = 0x08;
    pub const PREFIX_AUTH_PARAMS: u8 = 0x09;
    pub const PREFIX_ACCOUNT: u8 = 0x0a;
    pub const PREFIX_ACCOUNT_NUMBER: u8 = 0x0b;

    fn key(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
        let mut k = vec![prefix];
        for p in parts {
            k.extend_from_slice(p)
        }
        k
    }

    /// block hash -> height
    pub fn block_hash(hash: &Hash) -> Vec<u8> {
        key(PREFIX_BLOCK_HASH, &[hash.as_bytes()])
    }

    /// height -> block hash
    pub fn height_hash(height: u64) -> Vec<u8> {
        key(PREFIX_HEIGHT_HASH, &[&height.to_be_bytes()])
    }

    pub fn bloom(height: u64) -> Vec<u8> {
        key(PREFIX_BLOOM, &[&height.to_be_bytes()])
    }

    pub fn logs(tx_hash: &Hash) -> Vec<u8> {
        key(PREFIX_LOGS, &[tx_hash.as_bytes()])
    }

    pub fn code(addr: &Addr) -> Vec<u8> {
        key(PREFIX_CODE, &[addr.as_bytes()])
    }

    /// Prefix under which all storage slots of `addr` live.
    pub fn storage_prefix(addr: &Addr) -> Vec<u8> {
        key(PREFIX_STORAGE, &[addr.as_bytes()])
    }

    pub fn storage(addr: &Addr, slot: &Hash) -> Vec<u8> {
        key(PREFIX_STORAGE, &[addr.as_bytes(), slot.as_bytes()])
    }

    pub fn chain_config() -> Vec<u8> {
        vec![PREFIX_CHAIN_CONFIG]
    }

    pub fn params() -> Vec<u8> {
        vec![PREFIX_PARAMS]
    }

    pub fn auth_params() -> Vec<u8> {
        vec![PREFIX_AUTH_PARAMS]
    }

    pub fn account(addr: &Addr) -> Vec<u8> {
        key(PREFIX_ACCOUNT, &[addr.as_bytes()])
    }

    pub fn account_number() -> Vec<u8> {
        vec![PREFIX_ACCOUNT_NUMBER]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_iteration() {
        let mut store = MemStore::new();
        store.set(&[1, 0], vec![0]);
        store.set(&[1, 0xff], vec![1]);
        store.set(&[2], vec![2]);
        store.set(&[0xff, 0xff], vec![3]);
        assert_eq!(store.iter_prefix(&[1]).len(), 2);
        assert_eq!(store.iter_prefix(&[0xff]).len(), 1);
        assert_eq!(store.iter_prefix(&[]).len(), 4);
    }

    #[test]
    fn test_branch_write_and_discard() {
        let root = StoreHandle::new(MemStore::new());
        root.set(b"a", b"1".to_vec());
        let branch = root.branch();
        let h = branch.handle();
        h.set(b"b", b"2".to_vec());
        h.delete(b"a");
        assert_eq!(h.get(b"a"), None);
        assert_eq!(h.iter_prefix(b"").len(), 1);
        assert_eq!(root.get(b"b"), None);
        drop(h);
        branch.write();
        assert_eq!(root.get(b"b"), Some(b"2".to_vec()));
        assert!(!root.has(b"a"));

        let branch = root.branch();
        branch.handle().set(b"c", b"3".to_vec());
        drop(branch);
        assert!(!root.has(b"c"));
    }

    #[test]
    fn test_versions() {
        let mut store = MemStore::new();
        store.set(b"k", b"v1".to_vec());
        let h1 = store.commit(1);
        store.set(b"k", b"v2".to_vec());
        let h2 = store.commit(2);
        assert_ne!(h1, h2);
        assert_eq!(store.latest_version(), Some(2));
        assert_eq!(store.at_version(1).unwrap().get(b"k"), Some(b"v1".to_vec()));
        assert!(store.at_version(3).is_none());
    }
}
