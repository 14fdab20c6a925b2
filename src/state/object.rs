use std::collections::BTreeMap;

use crate::common::{Addr, Bytes, Hash, Wei};
use crate::store::{keys, StoreHandle};

/// The in-memory image of one account while it is being modified.
///
/// Code and committed storage are pulled from the store on first access.
/// Storage writes stay in `dirty_storage` until the object is committed.
#[derive(Clone, Debug)]
pub struct StateObject {
    address: Addr,
    pub(super) balance: Wei,
    pub(super) nonce: u64,
    pub(super) code_hash: Hash,
    pub(super) code: Option<Bytes>,
    pub(super) origin_storage: BTreeMap<Hash, Hash>,
    pub(super) dirty_storage: BTreeMap<Hash, Hash>,
    pub(super) dirty_code: bool,
    pub(super) suicided: bool,
}

impl StateObject {
    pub fn new(address: Addr, balance: Wei, nonce: u64, code_hash: Hash) -> Self {
        Self {
            address,
            balance,
            nonce,
            code_hash,
            code: None,
            origin_storage: BTreeMap::new(),
            dirty_storage: BTreeMap::new(),
            dirty_code: false,
            suicided: false,
        }
    }

    pub fn address(&self) -> &Addr {
        &self.address
    }

    pub fn balance(&self) -> &Wei {
        &self.balance
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn code_hash(&self) -> &Hash {
        &self.code_hash
    }

    pub fn suicided(&self) -> bool {
        self.suicided
    }

    /// EIP-161 emptiness.
    pub fn empty(&self) -> bool {
        self.nonce == 0 &&
            self.balance.is_zero() &&
            &self.code_hash == Hash::empty_bytes_hash()
    }

    /// Empty and without any non-zero storage slot, either pending or
    /// persisted.
    pub fn prunable(&self, store: &StoreHandle) -> bool {
        if !self.empty() {
            return false
        }
        if self.dirty_storage.values().any(|v| !v.is_zero()) {
            return false
        }
        store
            .iter_prefix(&keys::storage_prefix(&self.address))
            .into_iter()
            .all(|(k, _)| {
                let slot = Hash::from_slice(&k[1 + 20..]);
                self.dirty_storage.contains_key(&slot)
            })
    }

    pub fn code(&mut self, store: &StoreHandle) -> Bytes {
        if let Some(code) = &self.code {
            return code.clone()
        }
        if &self.code_hash == Hash::empty_bytes_hash() {
            return Bytes::empty()
        }
        let code: Bytes = store
            .get(&keys::code(&self.address))
            .unwrap_or_default()
            .into();
        self.code = Some(code.clone());
        code
    }

    pub(super) fn set_code(&mut self, code_hash: Hash, code: Bytes) {
        self.code_hash = code_hash;
        self.code = Some(code);
        self.dirty_code = true;
    }

    /// Value as of the last commit of this object.
    pub fn committed_state(&mut self, store: &StoreHandle, key: &Hash) -> Hash {
        if let Some(v) = self.origin_storage.get(key) {
            return v.clone()
        }
        let value = store
            .get(&keys::storage(&self.address, key))
            .filter(|v| v.len() == 32)
            .map(|v| Hash::from_slice(&v))
            .unwrap_or_default();
        self.origin_storage.insert(key.clone(), value.clone());
        value
    }

    pub fn state(&mut self, store: &StoreHandle, key: &Hash) -> Hash {
        match self.dirty_storage.get(key) {
            Some(v) => v.clone(),
            None => self.committed_state(store, key),
        }
    }

    pub(super) fn set_state(&mut self, key: Hash, value: Hash) {
        self.dirty_storage.insert(key, value);
    }

    /// Write dirty slots to the store. A zero value removes the slot.
    pub(super) fn commit_state(&mut self, store: &StoreHandle) {
        let dirty = std::mem::take(&mut self.dirty_storage);
        for (key, value) in dirty.into_iter() {
            let k = keys::storage(&self.address, &key);
            if value.is_zero() {
                store.delete(&k)
            } else {
                store.set(&k, value.as_bytes().to_vec())
            }
            self.origin_storage.insert(key, value);
        }
    }

    pub(super) fn commit_code(&mut self, store: &StoreHandle) {
        if !self.dirty_code {
            return
        }
        let k = keys::code(&self.address);
        match &self.code {
            Some(code) if !code.is_empty() => store.set(&k, code.to_vec()),
            _ => store.delete(&k),
        }
        self.dirty_code = false;
    }
}
