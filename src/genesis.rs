//! Genesis import and export of EVM accounts, logs and governance parameters.
use std::collections::BTreeSet;

use log::info;
use serde::{Deserialize, Serialize};

use crate::common::{Addr, Bytes, Hash, Log, Wei};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::evm::StateDb;
use crate::keeper::Keeper;
use crate::params::{AuthParams, ChainConfig, Params};

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StorageEntry {
    pub key: Hash,
    pub value: Hash,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Addr,
    pub balance: Wei,
    #[serde(default)]
    pub code: Bytes,
    #[serde(default)]
    pub storage: Vec<StorageEntry>,
}

impl GenesisAccount {
    pub fn validate(&self) -> Result<()> {
        if self.address.is_zero() {
            return Err(Error::InvalidGenesis("address cannot be empty".into()))
        }
        let mut seen = BTreeSet::new();
        for entry in self.storage.iter() {
            if !seen.insert(&entry.key) {
                return Err(Error::InvalidGenesis(format!(
                    "duplicate storage key {} for {}",
                    entry.key, self.address
                )))
            }
        }
        Ok(())
    }
}

/// The logs of one transaction.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TransactionLogs {
    pub hash: Hash,
    pub logs: Vec<Log>,
}

impl TransactionLogs {
    pub fn validate(&self) -> Result<()> {
        if self.hash.is_zero() {
            return Err(Error::InvalidGenesis("tx hash cannot be empty".into()))
        }
        for (i, log) in self.logs.iter().enumerate() {
            if log.address.is_zero() {
                return Err(Error::InvalidGenesis(format!(
                    "invalid log {}: address cannot be empty",
                    i
                )))
            }
            if log.tx_hash != self.hash {
                return Err(Error::InvalidGenesis(format!(
                    "invalid log {}: tx hash mismatch ({} != {})",
                    i, log.tx_hash, self.hash
                )))
            }
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct GenesisState {
    pub accounts: Vec<GenesisAccount>,
    #[serde(default)]
    pub tx_logs: Vec<TransactionLogs>,
    #[serde(default)]
    pub chain_config: ChainConfig,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub auth_params: AuthParams,
}

impl GenesisState {
    pub fn from_json(s: &str) -> Result<Self> {
        let state: GenesisState = serde_json::from_str(s)
            .map_err(|e| Error::InvalidGenesis(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut addrs = BTreeSet::new();
        for acc in self.accounts.iter() {
            acc.validate()?;
            if !addrs.insert(&acc.address) {
                return Err(Error::InvalidGenesis(format!(
                    "duplicate account {}",
                    acc.address
                )))
            }
        }
        let mut hashes = BTreeSet::new();
        for tx in self.tx_logs.iter() {
            tx.validate()?;
            if !hashes.insert(&tx.hash) {
                return Err(Error::InvalidGenesis(format!(
                    "duplicate tx logs {}",
                    tx.hash
                )))
            }
        }
        self.chain_config
            .validate()
            .map_err(|e| Error::InvalidGenesis(e.to_string()))?;
        self.params
            .validate()
            .map_err(|e| Error::InvalidGenesis(e.to_string()))?;
        self.auth_params
            .validate()
            .map_err(|e| Error::InvalidGenesis(e.to_string()))?;
        Ok(())
    }
}

/// Write the genesis state into the store of `ctx`.
pub fn init_genesis(ctx: &Context, keeper: &Keeper, state: &GenesisState) -> Result<()> {
    state.validate()?;
    let store = ctx.store();
    keeper.set_params(store, &state.params)?;
    keeper.set_chain_config(store, &state.chain_config)?;
    keeper.account_keeper().set_params(store, &state.auth_params);

    let mut csdb = keeper.state_db(store)?;
    for acc in state.accounts.iter() {
        // code first: the account record picks up its hash
        if !acc.code.is_empty() {
            csdb.set_code(&acc.address, acc.code.clone());
        }
        csdb.set_balance(&acc.address, acc.balance.clone());
        for entry in acc.storage.iter() {
            csdb.set_state(&acc.address, &entry.key, entry.value.clone());
        }
    }
    // genesis accounts are kept even when empty
    csdb.finalize(false);

    for tx in state.tx_logs.iter() {
        if !tx.logs.is_empty() {
            keeper.set_logs(store, &tx.hash, &tx.logs)?;
        }
    }
    info!(
        "imported genesis with {} accounts and {} log sets",
        state.accounts.len(),
        state.tx_logs.len()
    );
    Ok(())
}

/// Read the genesis state back from the committed store.
pub fn export_genesis(ctx: &Context, keeper: &Keeper) -> Result<GenesisState> {
    let store = ctx.store();
    let params = keeper.get_params(store)?;
    let ak = keeper.account_keeper();
    let accounts = ak
        .accounts(store)
        .into_iter()
        .map(|acc| GenesisAccount {
            balance: acc.balance(&params.evm_denom),
            code: keeper.get_code(store, &acc.address),
            storage: keeper
                .get_storage(store, &acc.address)
                .into_iter()
                .map(|(key, value)| StorageEntry { key, value })
                .collect(),
            address: acc.address,
        })
        .collect();
    let tx_logs = keeper
        .all_logs(store)
        .into_iter()
        .map(|(hash, logs)| TransactionLogs { hash, logs })
        .collect();
    Ok(GenesisState {
        accounts,
        tx_logs,
        chain_config: keeper.get_chain_config(store)?,
        params,
        auth_params: ak.params(store),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(b: u8) -> GenesisAccount {
        GenesisAccount {
            address: Addr::from([b; 20]),
            balance: 100.into(),
            code: Bytes::empty(),
            storage: Vec::new(),
        }
    }

    #[test]
    fn test_validate() {
        let mut state = GenesisState::default();
        state.accounts.push(account(1));
        assert!(state.validate().is_ok());

        let mut dup = state.clone();
        dup.accounts[0].storage = vec![
            StorageEntry {
                key: Hash::hash(b"k"),
                value: Hash::hash(b"1"),
            },
            StorageEntry {
                key: Hash::hash(b"k"),
                value: Hash::hash(b"2"),
            },
        ];
        assert!(matches!(dup.validate(), Err(Error::InvalidGenesis(_))));

        let mut zero = state.clone();
        zero.accounts.push(account(0));
        assert!(zero.validate().is_err());

        let mut logs = state.clone();
        logs.tx_logs.push(TransactionLogs {
            hash: Hash::hash(b"tx"),
            logs: vec![Log {
                address: Addr::from([1; 20]),
                tx_hash: Hash::hash(b"other"),
                ..Default::default()
            }],
        });
        assert!(logs.validate().is_err());
    }

    #[test]
    fn test_json() {
        let json = r#"{
            "accounts": [{
                "address": "0x0101010101010101010101010101010101010101",
                "balance": "0x64",
                "code": "0x6000"
            }]
        }"#;
        let state = GenesisState::from_json(json).unwrap();
        assert_eq!(state.accounts[0].balance, 100.into());
        assert_eq!(&state.accounts[0].code[..], &[0x60, 0x00]);
        assert_eq!(state.params, Params::default());
        let again = GenesisState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(again, state);
    }
}
