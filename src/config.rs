//! Node-local settings. Governance parameters live in the store, see [crate::params].
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::Coin;
use crate::common::Gas;
use crate::error::{Error, Result};
use crate::params::parse_chain_id;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `<name>-<epoch>`, the epoch being the EIP-155 chain ID.
    pub chain_id: String,
    /// Comma separated `<amount><denom>` list, e.g. `"10aphoton,1stake"`.
    /// Empty disables the mempool fee floor.
    pub minimum_gas_prices: String,
    /// Zero means unlimited.
    pub block_gas_limit: Gas,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: "ethermint-1".into(),
            minimum_gas_prices: String::new(),
            block_gas_limit: 0,
        }
    }
}

impl Config {
    pub fn from_json(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&s)
    }

    pub fn validate(&self) -> Result<()> {
        parse_chain_id(&self.chain_id)
            .map_err(|e| Error::Config(e.to_string()))?;
        self.min_gas_prices()?;
        Ok(())
    }

    pub fn min_gas_prices(&self) -> Result<Vec<Coin>> {
        self.minimum_gas_prices
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Coin::parse)
            .collect()
    }
}
