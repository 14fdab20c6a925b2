//! State object cache.
//!
//! [CommitStateDb] presents accounts, code and contract storage to the interpreter as an
//! in-memory, copy-on-write view over the store. Objects are loaded lazily through the
//! account keeper the first time they are touched. Every mutation appends a [JournalEntry]
//! carrying the previous value before it changes the cached object, so that
//! `revert_to_snapshot` can play the journal backwards down to any marker handed out by
//! `snapshot`. Nothing reaches the store until [CommitStateDb::finalize] walks the dirty
//! objects and writes (or prunes) them.
//!
//! The cache also collects the logs and SHA3 preimages of the running transaction and owns
//! the EIP-2929 [AccessList].
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, error};

use crate::auth::AccountKeeper;
use crate::common::{Addr, Bytes, Gas, Hash, Log, Wei};
use crate::evm::StateDb;
use crate::store::{keys, StoreHandle};

mod access_list;
mod journal;
mod object;

pub use access_list::AccessList;
pub use journal::{Journal, JournalEntry};
pub use object::StateObject;

#[derive(Clone, Copy, Debug)]
struct Revision {
    id: usize,
    journal_index: usize,
}

#[derive(Clone)]
pub struct CommitStateDb {
    store: StoreHandle,
    accounts: Arc<dyn AccountKeeper>,
    evm_denom: String,

    state_objects: BTreeMap<Addr, StateObject>,
    state_objects_dirty: BTreeSet<Addr>,

    journal: Journal,
    valid_revisions: Vec<Revision>,
    next_revision_id: usize,
    refund: Gas,

    tx_hash: Hash,
    block_hash: Hash,
    tx_index: u64,
    log_size: u64,
    height: u64,
    logs: BTreeMap<Hash, Vec<Log>>,
    preimages: BTreeMap<Hash, Bytes>,

    access_list: AccessList,
}

impl CommitStateDb {
    pub fn new(
        store: StoreHandle, accounts: Arc<dyn AccountKeeper>, evm_denom: &str,
    ) -> Self {
        Self {
            store,
            accounts,
            evm_denom: evm_denom.into(),
            state_objects: BTreeMap::new(),
            state_objects_dirty: BTreeSet::new(),
            journal: Journal::new(),
            valid_revisions: Vec::new(),
            next_revision_id: 0,
            refund: 0,
            tx_hash: Hash::default(),
            block_hash: Hash::default(),
            tx_index: 0,
            log_size: 0,
            height: 0,
            logs: BTreeMap::new(),
            preimages: BTreeMap::new(),
            access_list: AccessList::new(),
        }
    }

    /// Point the cache at another store (e.g. the branch of the current
    /// transaction). Cached objects are kept.
    pub fn set_store(&mut self, store: StoreHandle) {
        self.store = store
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn evm_denom(&self) -> &str {
        &self.evm_denom
    }

    pub fn set_evm_denom(&mut self, denom: &str) {
        self.evm_denom = denom.into()
    }

    pub fn tx_hash(&self) -> &Hash {
        &self.tx_hash
    }

    pub fn block_hash(&self) -> &Hash {
        &self.block_hash
    }

    pub fn tx_index(&self) -> u64 {
        self.tx_index
    }

    /// Bring the object into the cache; false if the account does not
    /// exist.
    fn load_object(&mut self, addr: &Addr) -> bool {
        if self.state_objects.contains_key(addr) {
            return true
        }
        match self.accounts.get_account(&self.store, addr) {
            Some(acc) => {
                let obj = StateObject::new(
                    addr.clone(),
                    acc.balance(&self.evm_denom),
                    acc.sequence,
                    acc.code_hash.clone(),
                );
                self.state_objects.insert(addr.clone(), obj);
                true
            }
            None => false,
        }
    }

    pub fn get_state_object(&mut self, addr: &Addr) -> Option<&mut StateObject> {
        if !self.load_object(addr) {
            return None
        }
        self.state_objects.get_mut(addr)
    }

    pub fn get_or_new_state_object(&mut self, addr: &Addr) -> &mut StateObject {
        if !self.load_object(addr) {
            self.create_object(addr);
        }
        self.state_objects
            .entry(addr.clone())
            .or_insert_with(|| Self::blank_object(addr))
    }

    fn blank_object(addr: &Addr) -> StateObject {
        StateObject::new(
            addr.clone(),
            Wei::default(),
            0,
            Hash::empty_bytes_hash().clone(),
        )
    }

    /// Replace any existing object at `addr` with a blank one. The account
    /// number is assigned by the account keeper when the object is first
    /// written.
    fn create_object(&mut self, addr: &Addr) {
        self.load_object(addr);
        match self
            .state_objects
            .insert(addr.clone(), Self::blank_object(addr))
        {
            None => self.journal.append(JournalEntry::CreateObject {
                account: addr.clone(),
            }),
            Some(prev) => self.journal.append(JournalEntry::ResetObject {
                prev: Box::new(prev),
            }),
        }
    }

    pub fn set_balance(&mut self, addr: &Addr, amount: Wei) {
        let obj = self.get_or_new_state_object(addr);
        let prev = std::mem::replace(&mut obj.balance, amount);
        self.journal.append(JournalEntry::BalanceChange {
            account: addr.clone(),
            prev,
        })
    }

    /// Drop every cached object without writing it.
    pub fn clear_state_objects(&mut self) {
        self.state_objects.clear();
        self.state_objects_dirty.clear();
        self.journal.clear();
        self.valid_revisions.clear();
        self.refund = 0;
    }

    /// Set the transaction the following logs belong to. Called before
    /// each transaction.
    pub fn prepare(&mut self, tx_hash: Hash, block_hash: Hash, tx_index: u64) {
        self.tx_hash = tx_hash;
        self.block_hash = block_hash;
        self.tx_index = tx_index;
        self.access_list = AccessList::new();
    }

    /// Forget everything except the store binding and the height.
    pub fn reset(&mut self) {
        self.clear_state_objects();
        self.tx_hash = Hash::default();
        self.block_hash = Hash::default();
        self.tx_index = 0;
        self.log_size = 0;
        self.logs.clear();
        self.preimages.clear();
        self.access_list = AccessList::new();
    }

    /// Refresh balances and nonces of cached objects from the account
    /// keeper, picking up changes made outside the interpreter (fee
    /// deduction, sequence increment).
    pub fn update_accounts(&mut self) {
        for (addr, obj) in self.state_objects.iter_mut() {
            if let Some(acc) = self.accounts.get_account(&self.store, addr) {
                obj.balance = acc.balance(&self.evm_denom);
                obj.nonce = acc.sequence;
            }
        }
    }

    /// An isolated working copy. Mutations of the copy never reach this
    /// cache; they reach the store only if the copy is finalized.
    pub fn copy(&self) -> Self {
        let mut copy = self.clone();
        copy.journal.clear();
        copy.valid_revisions.clear();
        copy
    }

    /// Write all dirty objects to the store and empty the cache. Suicided
    /// objects, and empty ones when `delete_empty` is set, are removed from
    /// the store instead.
    pub fn finalize(&mut self, delete_empty: bool) {
        let touched: Vec<Addr> = self.journal.dirty_accounts().cloned().collect();
        self.state_objects_dirty.extend(touched);
        let dirty = std::mem::take(&mut self.state_objects_dirty);
        let store = self.store.clone();
        let (mut written, mut deleted) = (0, 0);
        for addr in dirty.iter() {
            let obj = match self.state_objects.get_mut(addr) {
                Some(obj) => obj,
                None => continue,
            };
            if obj.suicided() || (delete_empty && obj.prunable(&store)) {
                self.delete_state_object(addr);
                deleted += 1;
            } else {
                obj.commit_state(&store);
                obj.commit_code(&store);
                if let Some(obj) = self.state_objects.get(addr) {
                    self.update_state_object(obj)
                }
                written += 1;
            }
        }
        debug!(
            "finalized state objects (written = {}, deleted = {})",
            written, deleted
        );
        self.clear_state_objects();
        self.access_list = AccessList::new();
    }

    fn update_state_object(&self, obj: &StateObject) {
        let addr = obj.address();
        let mut acc = self
            .accounts
            .get_account(&self.store, addr)
            .unwrap_or_else(|| {
                self.accounts.new_account_with_address(&self.store, addr)
            });
        acc.coins.set_amount(&self.evm_denom, obj.balance().clone());
        acc.sequence = obj.nonce();
        acc.code_hash = obj.code_hash().clone();
        self.accounts.set_account(&self.store, &acc)
    }

    fn delete_state_object(&self, addr: &Addr) {
        self.store.delete(&keys::code(addr));
        for (k, _) in self.store.iter_prefix(&keys::storage_prefix(addr)) {
            self.store.delete(&k)
        }
        if let Some(mut acc) = self.accounts.get_account(&self.store, addr) {
            acc.coins.set_amount(&self.evm_denom, Wei::default());
            if acc.coins.is_zero() {
                self.accounts.remove_account(&self.store, addr)
            } else {
                // coins of other denominations survive
                acc.code_hash = Hash::empty_bytes_hash().clone();
                acc.sequence = 0;
                self.accounts.set_account(&self.store, &acc)
            }
        }
    }

    /// Logs emitted under `tx_hash` by the running block.
    pub fn get_logs(&self, tx_hash: &Hash) -> Vec<Log> {
        self.logs.get(tx_hash).cloned().unwrap_or_default()
    }

    pub fn set_logs(&mut self, tx_hash: &Hash, logs: Vec<Log>) {
        self.log_size += logs.len() as u64;
        self.logs.insert(tx_hash.clone(), logs);
    }

    pub fn delete_logs(&mut self, tx_hash: &Hash) {
        self.logs.remove(tx_hash);
    }

    pub fn all_logs(&self) -> Vec<Log> {
        self.logs.values().flatten().cloned().collect()
    }

    pub fn preimages(&self) -> &BTreeMap<Hash, Bytes> {
        &self.preimages
    }

    fn revert_entry(&mut self, entry: JournalEntry) {
        use JournalEntry::*;
        match entry {
            CreateObject { account } => {
                self.state_objects.remove(&account);
                self.state_objects_dirty.remove(&account);
            }
            ResetObject { prev } => {
                self.state_objects.insert(prev.address().clone(), *prev);
            }
            Suicide {
                account,
                prev,
                prev_balance,
            } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.suicided = prev;
                    obj.balance = prev_balance;
                }
            }
            BalanceChange { account, prev } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.balance = prev
                }
            }
            NonceChange { account, prev } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.nonce = prev
                }
            }
            StorageChange {
                account,
                key,
                prev_value,
            } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.set_state(key, prev_value)
                }
            }
            CodeChange {
                account,
                prev_code,
                prev_hash,
            } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.code = prev_code;
                    obj.code_hash = prev_hash;
                }
            }
            RefundChange { prev } => self.refund = prev,
            AddLog { tx_hash } => {
                let now_empty = match self.logs.get_mut(&tx_hash) {
                    Some(logs) => {
                        logs.pop();
                        logs.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.logs.remove(&tx_hash);
                }
                self.log_size = self.log_size.saturating_sub(1);
            }
            AddPreimage { hash } => {
                self.preimages.remove(&hash);
            }
            Touch { .. } => (),
            AccessListAddAccount { address } => {
                self.access_list.delete_address(&address)
            }
            AccessListAddSlot { address, slot } => {
                self.access_list.delete_slot(&address, &slot)
            }
        }
    }
}

impl StateDb for CommitStateDb {
    /// Create a fresh account, carrying over the balance of any account
    /// already at `addr`.
    fn create_account(&mut self, addr: &Addr) {
        let prev_balance = self.get_state_object(addr).map(|o| o.balance.clone());
        self.create_object(addr);
        if let Some(balance) = prev_balance {
            self.get_or_new_state_object(addr).balance = balance
        }
    }

    fn sub_balance(&mut self, addr: &Addr, amount: &Wei) {
        if amount.is_zero() {
            return
        }
        let obj = self.get_or_new_state_object(addr);
        let balance = obj.balance.checked_sub(amount);
        match balance {
            Some(balance) => self.set_balance(addr, balance),
            None => error!("balance underflow on {}", addr),
        }
    }

    fn add_balance(&mut self, addr: &Addr, amount: &Wei) {
        let obj = self.get_or_new_state_object(addr);
        if amount.is_zero() {
            if obj.empty() {
                self.journal.append(JournalEntry::Touch {
                    account: addr.clone(),
                })
            }
            return
        }
        let balance = obj.balance.checked_add(amount);
        match balance {
            Some(balance) => self.set_balance(addr, balance),
            None => error!("balance overflow on {}", addr),
        }
    }

    fn get_balance(&mut self, addr: &Addr) -> Wei {
        self.get_state_object(addr)
            .map(|o| o.balance().clone())
            .unwrap_or_default()
    }

    fn get_nonce(&mut self, addr: &Addr) -> u64 {
        self.get_state_object(addr).map(|o| o.nonce()).unwrap_or(0)
    }

    fn set_nonce(&mut self, addr: &Addr, nonce: u64) {
        let obj = self.get_or_new_state_object(addr);
        let prev = std::mem::replace(&mut obj.nonce, nonce);
        self.journal.append(JournalEntry::NonceChange {
            account: addr.clone(),
            prev,
        })
    }

    fn get_code_hash(&mut self, addr: &Addr) -> Hash {
        self.get_state_object(addr)
            .map(|o| o.code_hash().clone())
            .unwrap_or_default()
    }

    fn get_code(&mut self, addr: &Addr) -> Bytes {
        let store = self.store.clone();
        self.get_state_object(addr)
            .map(|o| o.code(&store))
            .unwrap_or_default()
    }

    fn set_code(&mut self, addr: &Addr, code: Bytes) {
        let store = self.store.clone();
        let obj = self.get_or_new_state_object(addr);
        let prev_code = Some(obj.code(&store));
        let prev_hash = obj.code_hash().clone();
        obj.set_code(Hash::hash(&code), code);
        self.journal.append(JournalEntry::CodeChange {
            account: addr.clone(),
            prev_code,
            prev_hash,
        })
    }

    fn get_code_size(&mut self, addr: &Addr) -> usize {
        self.get_code(addr).len()
    }

    fn add_refund(&mut self, gas: Gas) {
        self.journal
            .append(JournalEntry::RefundChange { prev: self.refund });
        self.refund = self.refund.saturating_add(gas);
    }

    fn sub_refund(&mut self, gas: Gas) {
        self.journal
            .append(JournalEntry::RefundChange { prev: self.refund });
        if gas > self.refund {
            error!("refund counter below zero ({} < {})", self.refund, gas);
        }
        self.refund = self.refund.saturating_sub(gas);
    }

    fn get_refund(&self) -> Gas {
        self.refund
    }

    fn get_committed_state(&mut self, addr: &Addr, key: &Hash) -> Hash {
        let store = self.store.clone();
        self.get_state_object(addr)
            .map(|o| o.committed_state(&store, key))
            .unwrap_or_default()
    }

    fn get_state(&mut self, addr: &Addr, key: &Hash) -> Hash {
        let store = self.store.clone();
        self.get_state_object(addr)
            .map(|o| o.state(&store, key))
            .unwrap_or_default()
    }

    fn set_state(&mut self, addr: &Addr, key: &Hash, value: Hash) {
        let store = self.store.clone();
        let obj = self.get_or_new_state_object(addr);
        let prev_value = obj.state(&store, key);
        if prev_value == value {
            return
        }
        obj.set_state(key.clone(), value);
        self.journal.append(JournalEntry::StorageChange {
            account: addr.clone(),
            key: key.clone(),
            prev_value,
        })
    }

    fn suicide(&mut self, addr: &Addr) -> bool {
        let obj = match self.get_state_object(addr) {
            Some(obj) => obj,
            None => return false,
        };
        let prev = obj.suicided;
        let prev_balance = std::mem::take(&mut obj.balance);
        obj.suicided = true;
        self.journal.append(JournalEntry::Suicide {
            account: addr.clone(),
            prev,
            prev_balance,
        });
        true
    }

    fn has_suicided(&mut self, addr: &Addr) -> bool {
        self.get_state_object(addr)
            .map(|o| o.suicided())
            .unwrap_or(false)
    }

    fn exist(&mut self, addr: &Addr) -> bool {
        self.load_object(addr)
    }

    fn empty(&mut self, addr: &Addr) -> bool {
        self.get_state_object(addr).map(|o| o.empty()).unwrap_or(true)
    }

    fn prepare_access_list(
        &mut self, sender: &Addr, dest: Option<&Addr>, precompiles: &[Addr],
    ) {
        self.add_address_to_access_list(sender);
        if let Some(dest) = dest {
            self.add_address_to_access_list(dest);
        }
        for addr in precompiles {
            self.add_address_to_access_list(addr);
        }
    }

    fn address_in_access_list(&self, addr: &Addr) -> bool {
        self.access_list.contains_address(addr)
    }

    fn slot_in_access_list(&self, addr: &Addr, slot: &Hash) -> (bool, bool) {
        self.access_list.contains(addr, slot)
    }

    fn add_address_to_access_list(&mut self, addr: &Addr) {
        if self.access_list.add_address(addr) {
            self.journal.append(JournalEntry::AccessListAddAccount {
                address: addr.clone(),
            })
        }
    }

    fn add_slot_to_access_list(&mut self, addr: &Addr, slot: &Hash) {
        let (addr_change, slot_change) = self.access_list.add_slot(addr, slot);
        if addr_change {
            self.journal.append(JournalEntry::AccessListAddAccount {
                address: addr.clone(),
            })
        }
        if slot_change {
            self.journal.append(JournalEntry::AccessListAddSlot {
                address: addr.clone(),
                slot: slot.clone(),
            })
        }
    }

    fn snapshot(&mut self) -> usize {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.valid_revisions.push(Revision {
            id,
            journal_index: self.journal.len(),
        });
        id
    }

    fn revert_to_snapshot(&mut self, id: usize) {
        let idx = match self.valid_revisions.binary_search_by_key(&id, |r| r.id) {
            Ok(idx) => idx,
            Err(_) => {
                error!("revision id {} cannot be reverted", id);
                return
            }
        };
        let journal_index = self.valid_revisions[idx].journal_index;
        for entry in self.journal.split_off(journal_index) {
            self.revert_entry(entry)
        }
        self.valid_revisions.truncate(idx);
    }

    fn add_log(&mut self, address: &Addr, topics: Vec<Hash>, data: Bytes) {
        self.journal.append(JournalEntry::AddLog {
            tx_hash: self.tx_hash.clone(),
        });
        let log = Log {
            address: address.clone(),
            topics,
            data,
            block_number: self.height,
            tx_hash: self.tx_hash.clone(),
            tx_index: self.tx_index,
            block_hash: self.block_hash.clone(),
            index: self.log_size,
            removed: false,
        };
        self.logs.entry(self.tx_hash.clone()).or_default().push(log);
        self.log_size += 1;
    }

    fn add_preimage(&mut self, hash: &Hash, preimage: &[u8]) {
        if self.preimages.contains_key(hash) {
            return
        }
        self.journal
            .append(JournalEntry::AddPreimage { hash: hash.clone() });
        self.preimages.insert(hash.clone(), preimage.into());
    }
}
