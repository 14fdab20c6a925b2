//! Read-only query surface over committed state.
//!
//! Every query runs against a height-pinned copy of the committed store and never sees the
//! object cache of the block being executed.
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::common::{Addr, Bloom, Bytes, Hash, Log, Wei};
use crate::error::{Error, Result};
use crate::keeper::Keeper;
use crate::params::Params;
use crate::store::{MemStore, StoreHandle};

/// Ethereum wire protocol version reported to clients.
pub const PROTOCOL_VERSION: u64 = 65;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct QueryResAccount {
    pub balance: Wei,
    pub code_hash: Hash,
    pub nonce: u64,
}

pub struct Querier {
    keeper: Arc<Keeper>,
    root: Arc<RwLock<MemStore>>,
}

impl Querier {
    pub fn new(keeper: Arc<Keeper>, root: Arc<RwLock<MemStore>>) -> Self {
        Self { keeper, root }
    }

    /// Latest committed height; zero before the first commit.
    pub fn block_number(&self) -> u64 {
        self.root.read().latest_version().unwrap_or(0)
    }

    /// The committed store at `height`, or at the latest height.
    pub fn store_at(&self, height: Option<u64>) -> Result<StoreHandle> {
        let root = self.root.read();
        let height = match height.or_else(|| root.latest_version()) {
            Some(h) => h,
            None => return Ok(StoreHandle::new(root.clone())),
        };
        root.at_version(height)
            .map(StoreHandle::new)
            .ok_or_else(|| Error::BlockNotFound(format!("height {}", height)))
    }

    pub fn account(&self, addr: &Addr, height: Option<u64>) -> Result<QueryResAccount> {
        let store = self.store_at(height)?;
        Ok(QueryResAccount {
            balance: self.keeper.get_balance(&store, addr)?,
            code_hash: self.keeper.get_code_hash(&store, addr),
            nonce: self.keeper.get_nonce(&store, addr),
        })
    }

    pub fn balance(&self, addr: &Addr, height: Option<u64>) -> Result<Wei> {
        self.keeper.get_balance(&self.store_at(height)?, addr)
    }

    pub fn nonce(&self, addr: &Addr, height: Option<u64>) -> Result<u64> {
        Ok(self.keeper.get_nonce(&self.store_at(height)?, addr))
    }

    pub fn code(&self, addr: &Addr, height: Option<u64>) -> Result<Bytes> {
        Ok(self.keeper.get_code(&self.store_at(height)?, addr))
    }

    pub fn storage(&self, addr: &Addr, key: &Hash, height: Option<u64>) -> Result<Hash> {
        Ok(self.keeper.get_state(&self.store_at(height)?, addr, key))
    }

    pub fn hash_to_height(&self, hash: &Hash) -> Result<u64> {
        self.keeper
            .get_block_hash_mapping(&self.store_at(None)?, hash)
            .ok_or_else(|| Error::BlockNotFound(hash.to_hex()))
    }

    pub fn tx_logs(&self, tx_hash: &Hash) -> Result<Vec<Log>> {
        self.keeper.get_logs(&self.store_at(None)?, tx_hash)
    }

    /// Logs of every transaction of the block, in emission order.
    pub fn block_logs(&self, block_hash: &Hash) -> Result<Vec<Log>> {
        let store = self.store_at(None)?;
        let mut logs: Vec<Log> = self
            .keeper
            .all_logs(&store)
            .into_iter()
            .flat_map(|(_, logs)| logs)
            .filter(|log| &log.block_hash == block_hash)
            .collect();
        if logs.is_empty() &&
            self.keeper.get_block_hash_mapping(&store, block_hash).is_none()
        {
            return Err(Error::BlockNotFound(block_hash.to_hex()))
        }
        logs.sort_by_key(|log| (log.tx_index, log.index));
        Ok(logs)
    }

    pub fn logs_bloom(&self, height: u64) -> Result<Bloom> {
        self.keeper.get_block_bloom(&self.store_at(None)?, height)
    }

    pub fn params(&self) -> Result<Params> {
        self.keeper.get_params(&self.store_at(None)?)
    }

    /// Route a `/`-separated query path, e.g. `balance/0x…`, returning
    /// the JSON encoded answer.
    pub fn query(&self, path: &str, height: Option<u64>) -> Result<Vec<u8>> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        let addr = |i: usize| -> Result<Addr> {
            let s = parts.get(i).ok_or_else(|| bad_path(path))?;
            Addr::from_str(s).map_err(|_| bad_path(path))
        };
        let hash = |i: usize| -> Result<Hash> {
            let s = parts.get(i).ok_or_else(|| bad_path(path))?;
            Hash::from_str(s).map_err(|_| bad_path(path))
        };
        let json = match parts[0] {
            "protocolVersion" => serde_json::to_vec(&PROTOCOL_VERSION)?,
            "blockNumber" => serde_json::to_vec(&self.block_number())?,
            "balance" => serde_json::to_vec(&self.balance(&addr(1)?, height)?)?,
            "nonce" => serde_json::to_vec(&self.nonce(&addr(1)?, height)?)?,
            "code" => serde_json::to_vec(&self.code(&addr(1)?, height)?)?,
            "storage" => serde_json::to_vec(&self.storage(&addr(1)?, &hash(2)?, height)?)?,
            "account" => serde_json::to_vec(&self.account(&addr(1)?, height)?)?,
            "hashToHeight" => serde_json::to_vec(&self.hash_to_height(&hash(1)?)?)?,
            "transactionLogs" => serde_json::to_vec(&self.tx_logs(&hash(1)?)?)?,
            "logs" => serde_json::to_vec(&self.block_logs(&hash(1)?)?)?,
            "logsBloom" => {
                let height = parts
                    .get(1)
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| bad_path(path))?;
                serde_json::to_vec(&self.logs_bloom(height)?)?
            }
            "params" => serde_json::to_vec(&self.params()?)?,
            _ => return Err(bad_path(path)),
        };
        Ok(json)
    }
}

fn bad_path(path: &str) -> Error {
    Error::UnknownRequest(format!("query path {:?}", path))
}
