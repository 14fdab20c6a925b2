use serde::{Deserialize, Serialize};

use crate::common::{Gas, Hash, U256};
use crate::error::{Error, Result};

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum Fork {
    Frontier,
    Homestead,
    TangerineWhistle, // EIP-150
    SpuriousDragon,   // EIP-158/161
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul, // EIP-1344, EIP-1884, EIP-2200
    MuirGlacier,
    Berlin, // EIP-2929
    London, // EIP-3529, EIP-3198
}

pub const DEFAULT_EVM_DENOM: &str = "aphoton";

// gas consumption parameters
pub const GAS_TX: Gas = 21000;
pub const GAS_TX_CONTRACT_CREATION: Gas = 53000;
pub const GAS_TX_DATA_ZERO: Gas = 4;
pub const GAS_TX_DATA_NON_ZERO_FRONTIER: Gas = 68;
pub const GAS_TX_DATA_NON_ZERO_ISTANBUL: Gas = 16; // EIP-2028
pub const GAS_CREATE_DATA: Gas = 200;
pub const GAS_SSTORE_SET: Gas = 20000;
pub const GAS_LOG: Gas = 375;
pub const GAS_LOG_TOPIC: Gas = 375;
pub const GAS_LOG_DATA: Gas = 8;

/// Minimum gas a transaction must declare before any of its code runs.
pub fn intrinsic_gas(
    data: &[u8], contract_creation: bool, homestead: bool, istanbul: bool,
) -> Result<Gas> {
    let mut gas = if contract_creation && homestead {
        GAS_TX_CONTRACT_CREATION
    } else {
        GAS_TX
    };
    if data.is_empty() {
        return Ok(gas)
    }
    let overflow = || Error::InvalidTx("gas uint64 overflow".into());
    let nz = data.iter().filter(|b| **b != 0).count() as Gas;
    let z = data.len() as Gas - nz;
    let non_zero_gas = if istanbul {
        GAS_TX_DATA_NON_ZERO_ISTANBUL
    } else {
        GAS_TX_DATA_NON_ZERO_FRONTIER
    };
    gas = nz
        .checked_mul(non_zero_gas)
        .and_then(|g| gas.checked_add(g))
        .ok_or_else(overflow)?;
    gas = z
        .checked_mul(GAS_TX_DATA_ZERO)
        .and_then(|g| gas.checked_add(g))
        .ok_or_else(overflow)?;
    Ok(gas)
}

/// Protocol upgrade activation heights. `None` means the upgrade is never
/// activated.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    pub homestead_block: Option<u64>,
    pub dao_fork_block: Option<u64>,
    pub dao_fork_support: bool,
    pub eip150_block: Option<u64>,
    pub eip150_hash: Hash,
    pub eip155_block: Option<u64>,
    pub eip158_block: Option<u64>,
    pub byzantium_block: Option<u64>,
    pub constantinople_block: Option<u64>,
    pub petersburg_block: Option<u64>,
    pub istanbul_block: Option<u64>,
    pub muir_glacier_block: Option<u64>,
    pub berlin_block: Option<u64>,
    pub london_block: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            homestead_block: Some(0),
            dao_fork_block: Some(0),
            dao_fork_support: true,
            eip150_block: Some(0),
            eip150_hash: Hash::zero().clone(),
            eip155_block: Some(0),
            eip158_block: Some(0),
            byzantium_block: Some(0),
            constantinople_block: Some(0),
            petersburg_block: Some(0),
            istanbul_block: Some(0),
            muir_glacier_block: Some(0),
            berlin_block: None,
            london_block: None,
        }
    }
}

impl ChainConfig {
    fn schedule(&self) -> [(Fork, Option<u64>); 10] {
        [
            (Fork::Homestead, self.homestead_block),
            (Fork::TangerineWhistle, self.eip150_block),
            (Fork::SpuriousDragon, self.eip158_block),
            (Fork::Byzantium, self.byzantium_block),
            (Fork::Constantinople, self.constantinople_block),
            (Fork::Petersburg, self.petersburg_block),
            (Fork::Istanbul, self.istanbul_block),
            (Fork::MuirGlacier, self.muir_glacier_block),
            (Fork::Berlin, self.berlin_block),
            (Fork::London, self.london_block),
        ]
    }

    /// The latest fork active at `height`.
    pub fn fork_at(&self, height: u64) -> Fork {
        let mut fork = Fork::Frontier;
        for (f, block) in self.schedule() {
            match block {
                Some(b) if b <= height => fork = f,
                _ => (),
            }
        }
        fork
    }

    pub fn is_homestead(&self, height: u64) -> bool {
        matches!(self.homestead_block, Some(b) if b <= height)
    }

    pub fn is_istanbul(&self, height: u64) -> bool {
        matches!(self.istanbul_block, Some(b) if b <= height)
    }

    /// Activation heights of the scheduled forks must not decrease, and a
    /// fork may not be scheduled after one that is disabled.
    pub fn validate(&self) -> Result<()> {
        let mut last: Option<(Fork, u64)> = None;
        let mut disabled: Option<Fork> = None;
        for (fork, block) in self.schedule() {
            match (block, disabled) {
                (Some(_), Some(prev)) => {
                    return Err(Error::InvalidChainConfig(format!(
                        "{:?} is enabled although {:?} is not",
                        fork, prev
                    )))
                }
                (Some(b), None) => {
                    if let Some((prev, pb)) = last {
                        if b < pb {
                            return Err(Error::InvalidChainConfig(format!(
                                "{:?} block {} is lower than {:?} block {}",
                                fork, b, prev, pb
                            )))
                        }
                    }
                    last = Some((fork, b))
                }
                (None, _) => {
                    // London and Berlin may be left off independently.
                    if fork < Fork::Berlin && disabled.is_none() {
                        disabled = Some(fork)
                    }
                }
            }
        }
        if self.dao_fork_support && self.dao_fork_block.is_none() {
            return Err(Error::InvalidChainConfig(
                "dao fork support without a dao fork block".into(),
            ))
        }
        Ok(())
    }
}

/// Extra EIPs that may be enabled on top of the fork schedule.
pub const SUPPORTED_EIPS: &[i64] = &[1344, 1884, 2200, 2929, 3198, 3529];

/// Governance parameters of the EVM module.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Denomination used for fees and EVM balances.
    pub evm_denom: String,
    pub enable_create: bool,
    pub enable_call: bool,
    #[serde(default)]
    pub extra_eips: Vec<i64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            evm_denom: DEFAULT_EVM_DENOM.into(),
            enable_create: true,
            enable_call: true,
            extra_eips: Vec::new(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        validate_denom(&self.evm_denom)
            .map_err(|e| Error::InvalidParams(format!("evm denom: {}", e)))?;
        for eip in self.extra_eips.iter() {
            if !SUPPORTED_EIPS.contains(eip) {
                return Err(Error::InvalidParams(format!(
                    "EIP {} is not activateable",
                    eip
                )))
            }
        }
        Ok(())
    }
}

/// Coin denominations: 3 to 128 characters, starting with a letter.
pub fn validate_denom(denom: &str) -> std::result::Result<(), String> {
    let mut chars = denom.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => (),
        _ => return Err(format!("invalid denom {:?}", denom)),
    }
    if denom.len() < 3 || denom.len() > 128 {
        return Err(format!("invalid denom length {:?}", denom))
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '/') {
        return Err(format!("invalid denom {:?}", denom))
    }
    Ok(())
}

/// Governance parameters of the standard transaction pipeline.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AuthParams {
    pub max_memo_characters: u64,
    pub tx_sig_limit: u64,
    pub tx_size_cost_per_byte: Gas,
    pub sig_verify_cost_secp256k1: Gas,
}

impl Default for AuthParams {
    fn default() -> Self {
        Self {
            max_memo_characters: 256,
            tx_sig_limit: 7,
            tx_size_cost_per_byte: 10,
            sig_verify_cost_secp256k1: 21000,
        }
    }
}

impl AuthParams {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max memo characters", self.max_memo_characters),
            ("tx signature limit", self.tx_sig_limit),
            ("tx size cost per byte", self.tx_size_cost_per_byte),
            ("secp256k1 verification cost", self.sig_verify_cost_secp256k1),
        ];
        for (name, v) in fields {
            if v == 0 {
                return Err(Error::InvalidParams(format!(
                    "{} must be positive",
                    name
                )))
            }
        }
        Ok(())
    }
}

/// Parse the EIP-155 chain ID out of a chain identifier of the form
/// `<name>-<epoch>`, e.g. `ethermint-3`.
pub fn parse_chain_id(chain_id: &str) -> Result<U256> {
    let invalid = || Error::InvalidChainId(format!("{:?}", chain_id));
    let (name, epoch) = chain_id.split_once('-').ok_or_else(invalid)?;
    if !name.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(invalid())
    }
    match epoch.as_bytes().first() {
        Some(b'1'..=b'9') => (),
        _ => return Err(invalid()),
    }
    if !epoch.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid())
    }
    U256::from_dec_str(epoch).map_err(|_| invalid())
}

pub fn is_valid_chain_id(chain_id: &str) -> bool {
    parse_chain_id(chain_id).is_ok()
}
