use std::collections::{BTreeMap, BTreeSet};

use crate::common::{Addr, Hash};

/// EIP-2929 warm addresses and storage slots of the running transaction.
#[derive(Clone, Default, Debug)]
pub struct AccessList {
    addresses: BTreeMap<Addr, BTreeSet<Hash>>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_address(&self, addr: &Addr) -> bool {
        self.addresses.contains_key(addr)
    }

    /// (address present, slot present)
    pub fn contains(&self, addr: &Addr, slot: &Hash) -> (bool, bool) {
        match self.addresses.get(addr) {
            Some(slots) => (true, slots.contains(slot)),
            None => (false, false),
        }
    }

    /// Returns true when the address was not yet present.
    pub fn add_address(&mut self, addr: &Addr) -> bool {
        if self.addresses.contains_key(addr) {
            return false
        }
        self.addresses.insert(addr.clone(), BTreeSet::new());
        true
    }

    /// Returns (address added, slot added).
    pub fn add_slot(&mut self, addr: &Addr, slot: &Hash) -> (bool, bool) {
        let addr_change = self.add_address(addr);
        let slot_change = self
            .addresses
            .get_mut(addr)
            .map(|slots| slots.insert(slot.clone()))
            .unwrap_or(false);
        (addr_change, slot_change)
    }

    /// Undo of [AccessList::add_slot]; only called from journal revert.
    pub fn delete_slot(&mut self, addr: &Addr, slot: &Hash) {
        if let Some(slots) = self.addresses.get_mut(addr) {
            slots.remove(slot);
        }
    }

    /// Undo of [AccessList::add_address]. The slots must have been
    /// removed first.
    pub fn delete_address(&mut self, addr: &Addr) {
        self.addresses.remove(addr);
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_delete() {
        let mut al = AccessList::new();
        let a = Addr::from([1; 20]);
        let s = Hash::from([2; 32]);
        assert_eq!(al.add_slot(&a, &s), (true, true));
        assert_eq!(al.add_slot(&a, &s), (false, false));
        assert!(!al.add_address(&a));
        assert_eq!(al.contains(&a, &s), (true, true));
        al.delete_slot(&a, &s);
        assert_eq!(al.contains(&a, &s), (true, false));
        al.delete_address(&a);
        assert!(al.is_empty());
    }
}
