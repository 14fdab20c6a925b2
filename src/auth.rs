//! Account and bank collaborators.
//!
//! Balances and sequences live in [Account] records owned by the [AccountKeeper]. Both the
//! admission pipeline (fees, sequences) and the state object cache (EVM balances and nonces)
//! go through this one abstraction so that they observe the same view within a block.
use std::fmt;
use std::sync::Arc;

use log::{debug, error};
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::common::{Addr, Bytes, Hash, Wei};
use crate::error::{Error, Result};
use crate::params::{validate_denom, AuthParams};
use crate::store::{keys, StoreHandle};

#[derive(
    Clone,
    PartialEq,
    Eq,
    Debug,
    Serialize,
    Deserialize,
    RlpEncodable,
    RlpDecodable,
)]
pub struct Coin {
    pub denom: String,
    pub amount: Wei,
}

impl Coin {
    pub fn new(denom: &str, amount: Wei) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Parse `<amount><denom>`, e.g. `10aphoton`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::Config(format!("invalid coin {:?}", s)))?;
        let (amount, denom) = s.split_at(split);
        let amount = Wei::from_dec_str(amount)
            .ok_or_else(|| Error::Config(format!("invalid coin {:?}", s)))?;
        validate_denom(denom).map_err(Error::Config)?;
        Ok(Self::new(denom, amount))
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// A set of coins, sorted by denom and without zero amounts.
#[derive(Clone, PartialEq, Eq, Default, Debug, Serialize, Deserialize)]
pub struct Coins(Vec<Coin>);

impl Coins {
    pub fn new(coins: Vec<Coin>) -> Self {
        let mut this = Self::default();
        for c in coins.into_iter() {
            let total = this
                .amount_of(&c.denom)
                .checked_add(&c.amount)
                .unwrap_or(c.amount);
            this.set_amount(&c.denom, total)
        }
        this
    }

    pub fn single(denom: &str, amount: Wei) -> Self {
        Self::new(vec![Coin::new(denom, amount)])
    }

    pub fn amount_of(&self, denom: &str) -> Wei {
        self.0
            .iter()
            .find(|c| c.denom == denom)
            .map(|c| c.amount.clone())
            .unwrap_or_default()
    }

    pub fn set_amount(&mut self, denom: &str, amount: Wei) {
        match self.0.binary_search_by(|c| c.denom.as_str().cmp(denom)) {
            Ok(i) if amount.is_zero() => {
                self.0.remove(i);
            }
            Ok(i) => self.0[i].amount = amount,
            Err(_) if amount.is_zero() => (),
            Err(i) => self.0.insert(i, Coin::new(denom, amount)),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    pub fn checked_add(&self, other: &Coins) -> Option<Coins> {
        let mut sum = self.clone();
        for c in other.iter() {
            let total = sum.amount_of(&c.denom).checked_add(&c.amount)?;
            sum.set_amount(&c.denom, total)
        }
        Some(sum)
    }

    /// `None` when any denom would go negative.
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut diff = self.clone();
        for c in other.iter() {
            let rest = diff.amount_of(&c.denom).checked_sub(&c.amount)?;
            diff.set_amount(&c.denom, rest)
        }
        Some(diff)
    }

    /// True when, for at least one denom of `other`, `self` holds at least
    /// as much. An empty `other` is always met.
    pub fn is_any_gte(&self, other: &Coins) -> bool {
        other.is_zero() ||
            other.iter().any(|c| self.amount_of(&c.denom) >= c.amount)
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coins: Vec<_> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", coins.join(","))
    }
}

impl rlp::Encodable for Coins {
    fn rlp_append(&self, s: &mut rlp::RlpStream) {
        s.append_list::<Coin, _>(&self.0);
    }
}

impl rlp::Decodable for Coins {
    fn decode(rlp: &rlp::Rlp) -> std::result::Result<Self, rlp::DecoderError> {
        Ok(Self::new(rlp.as_list()?))
    }
}

/// Persisted account record.
#[derive(Clone, PartialEq, Eq, Debug, RlpEncodable, RlpDecodable)]
pub struct Account {
    pub address: Addr,
    pub coins: Coins,
    /// Compressed secp256k1 public key; empty until first signature.
    pub pub_key: Bytes,
    pub account_number: u64,
    pub sequence: u64,
    pub code_hash: Hash,
}

impl Account {
    pub fn new(address: Addr, account_number: u64) -> Self {
        Self {
            address,
            coins: Coins::default(),
            pub_key: Bytes::empty(),
            account_number,
            sequence: 0,
            code_hash: Hash::empty_bytes_hash().clone(),
        }
    }

    pub fn balance(&self, denom: &str) -> Wei {
        self.coins.amount_of(denom)
    }

    pub fn pub_key(&self) -> Option<&Bytes> {
        if self.pub_key.is_empty() {
            None
        } else {
            Some(&self.pub_key)
        }
    }
}

pub trait AccountKeeper: Send + Sync {
    fn get_account(&self, store: &StoreHandle, addr: &Addr) -> Option<Account>;
    fn set_account(&self, store: &StoreHandle, acc: &Account);
    /// Build a fresh account carrying the next account number. The account
    /// is not persisted until `set_account`.
    fn new_account_with_address(
        &self, store: &StoreHandle, addr: &Addr,
    ) -> Account;
    fn remove_account(&self, store: &StoreHandle, addr: &Addr);
    fn accounts(&self, store: &StoreHandle) -> Vec<Account>;
    fn params(&self, store: &StoreHandle) -> AuthParams;
    fn set_params(&self, store: &StoreHandle, params: &AuthParams);
}

/// [AccountKeeper] persisting RLP-encoded accounts under the account
/// prefix.
#[derive(Clone, Default, Debug)]
pub struct StoreAccountKeeper;

impl StoreAccountKeeper {
    pub fn new() -> Self {
        Self
    }

    fn next_account_number(&self, store: &StoreHandle) -> u64 {
        let key = keys::account_number();
        let n = store
            .get(&key)
            .and_then(|v| rlp::decode::<u64>(&v).ok())
            .unwrap_or(0);
        store.set(&key, rlp::encode(&(n + 1)).to_vec());
        n
    }
}

impl AccountKeeper for StoreAccountKeeper {
    fn get_account(&self, store: &StoreHandle, addr: &Addr) -> Option<Account> {
        let raw = store.get(&keys::account(addr))?;
        match rlp::decode(&raw) {
            Ok(acc) => Some(acc),
            Err(e) => {
                error!("corrupted account record for {}: {}", addr, e);
                None
            }
        }
    }

    fn set_account(&self, store: &StoreHandle, acc: &Account) {
        store.set(&keys::account(&acc.address), rlp::encode(acc).to_vec())
    }

    fn new_account_with_address(
        &self, store: &StoreHandle, addr: &Addr,
    ) -> Account {
        Account::new(addr.clone(), self.next_account_number(store))
    }

    fn remove_account(&self, store: &StoreHandle, addr: &Addr) {
        debug!("remove account {}", addr);
        store.delete(&keys::account(addr))
    }

    fn accounts(&self, store: &StoreHandle) -> Vec<Account> {
        store
            .iter_prefix(&[keys::PREFIX_ACCOUNT])
            .into_iter()
            .filter_map(|(_, v)| rlp::decode(&v).ok())
            .collect()
    }

    fn params(&self, store: &StoreHandle) -> AuthParams {
        store
            .get(&keys::auth_params())
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or_default()
    }

    fn set_params(&self, store: &StoreHandle, params: &AuthParams) {
        match serde_json::to_vec(params) {
            Ok(v) => store.set(&keys::auth_params(), v),
            Err(e) => error!("failed to encode auth params: {}", e),
        }
    }
}

/// Account receiving the collected fees.
pub fn fee_collector() -> Addr {
    Addr::from_slice(&Hash::hash(b"fee_collector").as_bytes()[12..])
}

pub trait BankKeeper: Send + Sync {
    /// Move `fees` from `payer` to the fee collector. Either the whole
    /// amount moves or nothing does.
    fn deduct_fees(
        &self, store: &StoreHandle, payer: &Addr, fees: &Coins,
    ) -> Result<()>;
    fn send_coins(
        &self, store: &StoreHandle, from: &Addr, to: &Addr, amount: &Coins,
    ) -> Result<()>;
    fn get_balance(&self, store: &StoreHandle, addr: &Addr, denom: &str) -> Wei;
}

#[derive(Clone)]
pub struct StoreBankKeeper {
    accounts: Arc<dyn AccountKeeper>,
}

impl StoreBankKeeper {
    pub fn new(accounts: Arc<dyn AccountKeeper>) -> Self {
        Self { accounts }
    }
}

impl BankKeeper for StoreBankKeeper {
    fn deduct_fees(
        &self, store: &StoreHandle, payer: &Addr, fees: &Coins,
    ) -> Result<()> {
        self.send_coins(store, payer, &fee_collector(), fees)
            .map_err(|e| match e {
                Error::InsufficientFunds(_) => Error::InsufficientFunds(
                    format!("insufficient funds to pay for fees; {}", fees),
                ),
                e => e,
            })
    }

    fn send_coins(
        &self, store: &StoreHandle, from: &Addr, to: &Addr, amount: &Coins,
    ) -> Result<()> {
        let mut sender = self
            .accounts
            .get_account(store, from)
            .ok_or_else(|| Error::UnknownAddress(from.to_hex()))?;
        sender.coins = sender.coins.checked_sub(amount).ok_or_else(|| {
            Error::InsufficientFunds(format!(
                "{} is smaller than {}",
                sender.coins, amount
            ))
        })?;
        if from == to {
            return Ok(())
        }
        let mut recipient = self
            .accounts
            .get_account(store, to)
            .unwrap_or_else(|| self.accounts.new_account_with_address(store, to));
        recipient.coins =
            recipient.coins.checked_add(amount).ok_or_else(|| {
                Error::InvalidState(format!("balance overflow for {}", to))
            })?;
        // both records are checked before either is written
        self.accounts.set_account(store, &sender);
        self.accounts.set_account(store, &recipient);
        Ok(())
    }

    fn get_balance(&self, store: &StoreHandle, addr: &Addr, denom: &str) -> Wei {
        self.accounts
            .get_account(store, addr)
            .map(|acc| acc.balance(denom))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn test_coins_arith() {
        let a = Coins::new(vec![
            Coin::new("stake", 5.into()),
            Coin::new("aphoton", 10.into()),
            Coin::new("stake", 1.into()),
        ]);
        assert_eq!(a.to_string(), "10aphoton,6stake");
        let b = Coins::single("aphoton", 10.into());
        let c = a.checked_sub(&b).unwrap();
        assert_eq!(c.to_string(), "6stake");
        assert!(c.checked_sub(&b).is_none());
        assert!(a.is_any_gte(&Coins::single("stake", 6.into())));
        assert!(!a.is_any_gte(&Coins::single("stake", 7.into())));
        assert_eq!(Coin::parse("25aphoton").unwrap().amount, 25.into());
        assert!(Coin::parse("aphoton").is_err());
    }

    #[test]
    fn test_deduct_fees_atomic() {
        let store = StoreHandle::new(MemStore::new());
        let ak = Arc::new(StoreAccountKeeper::new());
        let bank = StoreBankKeeper::new(ak.clone());
        let addr = Addr::from([1; 20]);
        let mut acc = ak.new_account_with_address(&store, &addr);
        acc.coins = Coins::single("aphoton", 100.into());
        ak.set_account(&store, &acc);

        let too_much = Coins::single("aphoton", 101.into());
        assert!(matches!(
            bank.deduct_fees(&store, &addr, &too_much),
            Err(Error::InsufficientFunds(_))
        ));
        assert_eq!(bank.get_balance(&store, &addr, "aphoton"), 100.into());
        assert!(ak.get_account(&store, &fee_collector()).is_none());

        bank.deduct_fees(&store, &addr, &Coins::single("aphoton", 40.into()))
            .unwrap();
        assert_eq!(bank.get_balance(&store, &addr, "aphoton"), 60.into());
        assert_eq!(
            bank.get_balance(&store, &fee_collector(), "aphoton"),
            40.into()
        );
    }

    #[test]
    fn test_account_numbers() {
        let store = StoreHandle::new(MemStore::new());
        let ak = StoreAccountKeeper::new();
        let a = ak.new_account_with_address(&store, &Addr::from([1; 20]));
        let b = ak.new_account_with_address(&store, &Addr::from([2; 20]));
        assert_eq!(a.account_number, 0);
        assert_eq!(b.account_number, 1);
        ak.set_account(&store, &a);
        assert_eq!(ak.get_account(&store, &a.address), Some(a));
        assert_eq!(ak.accounts(&store).len(), 1);
    }
}
