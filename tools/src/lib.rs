//! Test fixtures: a deterministic interpreter, signing keys and a ready-made keeper stack
//! over an in-memory store.
use std::sync::Arc;

use evmhost::ante::AnteHandler;
use evmhost::auth::{
    AccountKeeper, BankKeeper, Coins, StoreAccountKeeper, StoreBankKeeper,
};
use evmhost::common::{Addr, Hash, Wei};
use evmhost::config::Config;
use evmhost::context::{Context, ExecMode, Header};
use evmhost::genesis::GenesisState;
use evmhost::keeper::Keeper;
use evmhost::params::{AuthParams, ChainConfig, Params};
use evmhost::processor::BlockProcessor;
use evmhost::store::{MemStore, StoreHandle};

pub mod dummy;
pub mod keys;

pub const CHAIN_ID: &str = "ethermint-3";
pub const EIP155_CHAIN_ID: u64 = 3;
pub const DENOM: &str = "aphoton";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Header of block `height` with a hash derived from the height.
pub fn header(height: u64) -> Header {
    Header {
        height,
        time: 1_600_000_000 + height * 5,
        chain_id: CHAIN_ID.into(),
        hash: block_hash(height),
        last_block_hash: if height == 0 {
            Hash::default()
        } else {
            block_hash(height - 1)
        },
        gas_limit: 0,
    }
}

pub fn block_hash(height: u64) -> Hash {
    Hash::hash(format!("block-{}", height).as_bytes())
}

/// Keepers wired over one in-memory store holding the default
/// governance parameters.
pub struct TestEnv {
    pub store: StoreHandle,
    pub ak: Arc<dyn AccountKeeper>,
    pub bank: Arc<dyn BankKeeper>,
    pub keeper: Arc<Keeper>,
}

impl TestEnv {
    pub fn new() -> Self {
        init_logger();
        let store = StoreHandle::new(MemStore::new());
        let ak: Arc<dyn AccountKeeper> = Arc::new(StoreAccountKeeper::new());
        let bank: Arc<dyn BankKeeper> = Arc::new(StoreBankKeeper::new(ak.clone()));
        let keeper = Arc::new(Keeper::new(
            ak.clone(),
            bank.clone(),
            Arc::new(dummy::DummyEvm::new()),
        ));
        keeper
            .set_params(&store, &Params::default())
            .expect("default params are valid");
        keeper
            .set_chain_config(&store, &ChainConfig::default())
            .expect("default chain config is valid");
        ak.set_params(&store, &AuthParams::default());
        Self {
            store,
            ak,
            bank,
            keeper,
        }
    }

    pub fn ctx(&self, height: u64, mode: ExecMode) -> Context {
        Context::new(self.store.clone(), header(height), mode)
    }

    pub fn ante(&self) -> AnteHandler {
        AnteHandler::new(self.keeper.clone(), self.ak.clone(), self.bank.clone())
    }

    /// Create (or top up) the account of `addr` with `amount` of the EVM
    /// denomination.
    pub fn fund(&self, addr: &Addr, amount: u64) {
        let mut acc = self
            .ak
            .get_account(&self.store, addr)
            .unwrap_or_else(|| self.ak.new_account_with_address(&self.store, addr));
        let balance = acc
            .balance(DENOM)
            .checked_add(&Wei::from(amount))
            .expect("test balance overflow");
        acc.coins.set_amount(DENOM, balance);
        self.ak.set_account(&self.store, &acc);
    }

    pub fn balance(&self, addr: &Addr) -> Wei {
        self.bank.get_balance(&self.store, addr, DENOM)
    }

    pub fn nonce(&self, addr: &Addr) -> u64 {
        self.keeper.get_nonce(&self.store, addr)
    }

    pub fn set_nonce(&self, addr: &Addr, nonce: u64) {
        let mut acc = self
            .ak
            .get_account(&self.store, addr)
            .unwrap_or_else(|| self.ak.new_account_with_address(&self.store, addr));
        acc.sequence = nonce;
        self.ak.set_account(&self.store, &acc);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn coins(amount: u64) -> Coins {
    Coins::single(DENOM, amount.into())
}

/// A processor for [CHAIN_ID] running [dummy::DummyEvm], initialized with
/// `genesis`.
pub fn processor(config: Config, genesis: &GenesisState) -> BlockProcessor {
    init_logger();
    let ak: Arc<dyn AccountKeeper> = Arc::new(StoreAccountKeeper::new());
    let bank: Arc<dyn BankKeeper> = Arc::new(StoreBankKeeper::new(ak.clone()));
    let mut p = BlockProcessor::new(config, ak, bank, Arc::new(dummy::DummyEvm::new()))
        .expect("valid config");
    p.init_chain(header(0).time, genesis).expect("valid genesis");
    p
}

pub fn config() -> Config {
    Config {
        chain_id: CHAIN_ID.into(),
        ..Default::default()
    }
}
