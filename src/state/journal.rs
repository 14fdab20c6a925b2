use std::collections::BTreeMap;

use super::object::StateObject;
use crate::common::{Addr, Bytes, Gas, Hash, Wei};

/// One reversible modification of the state object cache, holding what
/// is needed to undo it.
#[derive(Clone, Debug)]
pub enum JournalEntry {
    CreateObject {
        account: Addr,
    },
    ResetObject {
        prev: Box<StateObject>,
    },
    Suicide {
        account: Addr,
        prev: bool,
        prev_balance: Wei,
    },
    BalanceChange {
        account: Addr,
        prev: Wei,
    },
    NonceChange {
        account: Addr,
        prev: u64,
    },
    StorageChange {
        account: Addr,
        key: Hash,
        prev_value: Hash,
    },
    CodeChange {
        account: Addr,
        prev_code: Option<Bytes>,
        prev_hash: Hash,
    },
    RefundChange {
        prev: Gas,
    },
    AddLog {
        tx_hash: Hash,
    },
    AddPreimage {
        hash: Hash,
    },
    Touch {
        account: Addr,
    },
    AccessListAddAccount {
        address: Addr,
    },
    AccessListAddSlot {
        address: Addr,
        slot: Hash,
    },
}

impl JournalEntry {
    /// The account whose cached object this entry modifies.
    pub fn dirtied(&self) -> Option<&Addr> {
        use JournalEntry::*;
        match self {
            CreateObject { account } |
            Suicide { account, .. } |
            BalanceChange { account, .. } |
            NonceChange { account, .. } |
            StorageChange { account, .. } |
            CodeChange { account, .. } |
            Touch { account } => Some(account),
            ResetObject { prev } => Some(prev.address()),
            RefundChange { .. } |
            AddLog { .. } |
            AddPreimage { .. } |
            AccessListAddAccount { .. } |
            AccessListAddSlot { .. } => None,
        }
    }
}

/// Ordered list of modifications plus, per account, how many of them are
/// still outstanding.
#[derive(Clone, Default, Debug)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    dirties: BTreeMap<Addr, usize>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: JournalEntry) {
        if let Some(addr) = entry.dirtied() {
            *self.dirties.entry(addr.clone()).or_insert(0) += 1;
        }
        self.entries.push(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return the entries from `index` on, newest first.
    pub fn split_off(&mut self, index: usize) -> Vec<JournalEntry> {
        let mut tail = self.entries.split_off(index.min(self.entries.len()));
        for entry in tail.iter() {
            if let Some(addr) = entry.dirtied() {
                if let Some(n) = self.dirties.get_mut(addr) {
                    *n -= 1;
                    if *n == 0 {
                        self.dirties.remove(addr);
                    }
                }
            }
        }
        tail.reverse();
        tail
    }

    /// Accounts with at least one outstanding modification.
    pub fn dirty_accounts(&self) -> impl Iterator<Item = &Addr> {
        self.dirties.keys()
    }

    pub fn is_dirty(&self, addr: &Addr) -> bool {
        self.dirties.contains_key(addr)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirties.clear();
    }
}
