//! Persistence of block-level EVM data and the per-block execution session.
//!
//! The [Keeper] maps the in-memory model onto the key/value store: block hash history, the
//! bloom of every finished block, the logs of every transaction, and the governance-held
//! chain configuration and parameters. It also owns the interpreter and runs the message
//! handlers that feed validated transactions to the state transition engine.
//!
//! Per-block mutable data (the running bloom, the transaction counter and the state object
//! cache) lives in a [BlockSession] that [Keeper::begin_block] creates and
//! [Keeper::end_block] consumes, so nothing can leak from one block into the next.
use std::sync::Arc;

use log::{debug, error};

use crate::auth::{AccountKeeper, BankKeeper};
use crate::common::{Addr, Bloom, Bytes, Hash, Log, Wei};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::evm::Evm;
use crate::params::{parse_chain_id, ChainConfig, Params};
use crate::state::CommitStateDb;
use crate::state_transition::{ExecutionResult, StateTransition};
use crate::store::{keys, StoreHandle};
use crate::tx::{EthTx, MsgEthermint};

/// Hash of the block at `height`, if recorded.
pub fn get_height_hash(store: &StoreHandle, height: u64) -> Option<Hash> {
    store
        .get(&keys::height_hash(height))
        .filter(|v| v.len() == 32)
        .map(|v| Hash::from_slice(&v))
}

/// Block-scoped state: created at block start, consumed at block end.
pub struct BlockSession {
    height: u64,
    block_hash: Hash,
    bloom: Bloom,
    tx_count: u64,
    state: CommitStateDb,
}

impl BlockSession {
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn block_hash(&self) -> &Hash {
        &self.block_hash
    }

    /// OR of the blooms of the transactions executed so far.
    pub fn bloom(&self) -> &Bloom {
        &self.bloom
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    pub fn state(&self) -> &CommitStateDb {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut CommitStateDb {
        &mut self.state
    }
}

pub struct Keeper {
    ak: Arc<dyn AccountKeeper>,
    bank: Arc<dyn BankKeeper>,
    evm: Arc<dyn Evm>,
}

impl Keeper {
    pub fn new(
        ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>, evm: Arc<dyn Evm>,
    ) -> Self {
        Self { ak, bank, evm }
    }

    pub fn account_keeper(&self) -> &Arc<dyn AccountKeeper> {
        &self.ak
    }

    pub fn bank_keeper(&self) -> &Arc<dyn BankKeeper> {
        &self.bank
    }

    // block hash history

    pub fn set_block_hash_mapping(&self, store: &StoreHandle, hash: &Hash, height: u64) {
        if hash.is_zero() {
            return
        }
        store.set(&keys::block_hash(hash), height.to_be_bytes().to_vec())
    }

    pub fn get_block_hash_mapping(&self, store: &StoreHandle, hash: &Hash) -> Option<u64> {
        let raw = store.get(&keys::block_hash(hash))?;
        let bytes: [u8; 8] = raw.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    pub fn set_height_hash(&self, store: &StoreHandle, height: u64, hash: &Hash) {
        store.set(&keys::height_hash(height), hash.as_bytes().to_vec())
    }

    pub fn get_height_hash(&self, store: &StoreHandle, height: u64) -> Option<Hash> {
        get_height_hash(store, height)
    }

    // blooms

    pub fn set_block_bloom(&self, store: &StoreHandle, height: u64, bloom: &Bloom) {
        store.set(&keys::bloom(height), bloom.as_bytes().to_vec())
    }

    pub fn get_block_bloom(&self, store: &StoreHandle, height: u64) -> Result<Bloom> {
        store
            .get(&keys::bloom(height))
            .and_then(|v| Bloom::from_slice(&v))
            .ok_or(Error::BloomNotFound(height))
    }

    // transaction logs

    /// Persist the logs of a transaction. An empty set is refused; callers
    /// skip transactions that logged nothing.
    pub fn set_logs(&self, store: &StoreHandle, tx_hash: &Hash, logs: &[Log]) -> Result<()> {
        if logs.is_empty() {
            return Err(Error::EmptyLogs(tx_hash.clone()))
        }
        store.set(&keys::logs(tx_hash), rlp::encode_list::<Log, _>(logs).to_vec());
        Ok(())
    }

    pub fn get_logs(&self, store: &StoreHandle, tx_hash: &Hash) -> Result<Vec<Log>> {
        let raw = store
            .get(&keys::logs(tx_hash))
            .ok_or_else(|| Error::LogsNotFound(tx_hash.clone()))?;
        Ok(rlp::Rlp::new(&raw).as_list()?)
    }

    pub fn delete_logs(&self, store: &StoreHandle, tx_hash: &Hash) {
        store.delete(&keys::logs(tx_hash))
    }

    /// Every persisted log set, keyed by transaction hash.
    pub fn all_logs(&self, store: &StoreHandle) -> Vec<(Hash, Vec<Log>)> {
        store
            .iter_prefix(&[keys::PREFIX_LOGS])
            .into_iter()
            .filter_map(|(k, v)| {
                let logs = rlp::Rlp::new(&v).as_list().ok()?;
                Some((Hash::from_slice(&k[1..]), logs))
            })
            .collect()
    }

    // governance

    pub fn get_chain_config(&self, store: &StoreHandle) -> Result<ChainConfig> {
        let raw = store.get(&keys::chain_config()).ok_or_else(|| {
            error!("chain configuration is missing from the store");
            Error::ChainConfigNotFound
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn set_chain_config(&self, store: &StoreHandle, config: &ChainConfig) -> Result<()> {
        config.validate()?;
        store.set(&keys::chain_config(), serde_json::to_vec(config)?);
        Ok(())
    }

    pub fn get_params(&self, store: &StoreHandle) -> Result<Params> {
        let raw = store.get(&keys::params()).ok_or_else(|| {
            error!("evm params are missing from the store");
            Error::ParamsNotFound
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn set_params(&self, store: &StoreHandle, params: &Params) -> Result<()> {
        params.validate()?;
        store.set(&keys::params(), serde_json::to_vec(params)?);
        Ok(())
    }

    // committed account data, bypassing the object cache

    pub fn get_balance(&self, store: &StoreHandle, addr: &Addr) -> Result<Wei> {
        let denom = self.get_params(store)?.evm_denom;
        Ok(self.bank.get_balance(store, addr, &denom))
    }

    pub fn get_nonce(&self, store: &StoreHandle, addr: &Addr) -> u64 {
        self.ak
            .get_account(store, addr)
            .map(|acc| acc.sequence)
            .unwrap_or(0)
    }

    pub fn get_code_hash(&self, store: &StoreHandle, addr: &Addr) -> Hash {
        self.ak
            .get_account(store, addr)
            .map(|acc| acc.code_hash)
            .unwrap_or_else(|| Hash::empty_bytes_hash().clone())
    }

    pub fn get_code(&self, store: &StoreHandle, addr: &Addr) -> Bytes {
        store.get(&keys::code(addr)).unwrap_or_default().into()
    }

    pub fn get_state(&self, store: &StoreHandle, addr: &Addr, key: &Hash) -> Hash {
        store
            .get(&keys::storage(addr, key))
            .filter(|v| v.len() == 32)
            .map(|v| Hash::from_slice(&v))
            .unwrap_or_default()
    }

    /// All non-zero storage slots of `addr`, in key order.
    pub fn get_storage(&self, store: &StoreHandle, addr: &Addr) -> Vec<(Hash, Hash)> {
        let prefix = keys::storage_prefix(addr);
        store
            .iter_prefix(&prefix)
            .into_iter()
            .filter(|(k, v)| k.len() == prefix.len() + 32 && v.len() == 32)
            .map(|(k, v)| (Hash::from_slice(&k[prefix.len()..]), Hash::from_slice(&v)))
            .collect()
    }

    /// A fresh object cache over `store`.
    pub fn state_db(&self, store: &StoreHandle) -> Result<CommitStateDb> {
        let params = self.get_params(store)?;
        Ok(CommitStateDb::new(store.clone(), self.ak.clone(), &params.evm_denom))
    }

    // block boundaries

    /// Record the previous block in the hash history and open the session
    /// of the new block with an empty bloom and a zero transaction count.
    pub fn begin_block(&self, ctx: &Context) -> Result<BlockSession> {
        let header = ctx.header();
        let store = ctx.store();
        if header.height >= 1 && !header.last_block_hash.is_zero() {
            let prev = header.height - 1;
            self.set_block_hash_mapping(store, &header.last_block_hash, prev);
            self.set_height_hash(store, prev, &header.last_block_hash);
        }
        debug!("begin block {} ({})", header.height, header.hash);
        self.new_session(ctx)
    }

    /// A session for the block of `ctx` that records nothing in the
    /// store. Admission runs against one of these.
    pub fn new_session(&self, ctx: &Context) -> Result<BlockSession> {
        let header = ctx.header();
        let mut state = self.state_db(ctx.store())?;
        state.set_height(header.height);
        Ok(BlockSession {
            height: header.height,
            block_hash: header.hash.clone(),
            bloom: Bloom::default(),
            tx_count: 0,
            state,
        })
    }

    /// Flush the object cache and persist the block bloom. Returns the
    /// bloom of the block.
    pub fn end_block(&self, ctx: &Context, session: BlockSession) -> Result<Bloom> {
        let BlockSession {
            height,
            bloom,
            tx_count,
            mut state,
            ..
        } = session;
        state.set_store(ctx.store().clone());
        state.update_accounts();
        state.finalize(true);
        self.set_block_bloom(ctx.store(), height, &bloom);
        debug!("end block {} ({} txs)", height, tx_count);
        Ok(bloom)
    }

    // message handlers

    /// Execute a validated Ethereum transaction. In admission mode the
    /// execution is simulated and leaves the session untouched.
    pub fn ethereum_tx(
        &self, ctx: &mut Context, session: &mut BlockSession, tx: &mut EthTx,
    ) -> Result<ExecutionResult> {
        let chain_id = parse_chain_id(ctx.chain_id())?;
        let sender = tx.verify_sig(&chain_id)?;
        let tx_hash = tx.hash().clone();
        let (csdb, meta) = split_session(session);
        let st = StateTransition {
            account_nonce: tx.nonce(),
            price: tx.price().clone(),
            gas_limit: tx.gas(),
            recipient: tx.to().cloned(),
            amount: tx.value().clone(),
            payload: tx.payload().clone(),
            csdb,
            chain_id,
            tx_hash: Some(tx_hash),
            sender,
            simulate: ctx.is_check_tx(),
        };
        self.execute(ctx, meta, st)
    }

    /// Execute an EVM message carried by a standard transaction.
    pub fn ethermint_msg(
        &self, ctx: &mut Context, session: &mut BlockSession, msg: &MsgEthermint,
        tx_hash: Hash,
    ) -> Result<ExecutionResult> {
        let chain_id = parse_chain_id(ctx.chain_id())?;
        let (csdb, meta) = split_session(session);
        let st = StateTransition {
            account_nonce: msg.account_nonce,
            price: msg.price.clone(),
            gas_limit: msg.gas_limit,
            recipient: msg.recipient.0.clone(),
            amount: msg.amount.clone(),
            payload: msg.payload.clone(),
            csdb,
            chain_id,
            tx_hash: Some(tx_hash),
            sender: msg.from.clone(),
            simulate: ctx.is_check_tx(),
        };
        self.execute(ctx, meta, st)
    }

    fn execute(
        &self, ctx: &mut Context, meta: SessionMeta<'_>, mut st: StateTransition<'_>,
    ) -> Result<ExecutionResult> {
        let config = self.get_chain_config(ctx.store())?;
        let params = self.get_params(ctx.store())?;
        let tx_hash = st.tx_hash.clone().unwrap_or_default();

        st.csdb.set_store(ctx.store().clone());
        if !st.simulate {
            st.csdb.prepare(tx_hash.clone(), meta.block_hash.clone(), *meta.tx_count);
            *meta.tx_count += 1;
        }

        let result = st.transition_db(ctx, &config, &params, self.evm.as_ref())?;

        if !st.simulate {
            *meta.bloom |= &result.bloom;
            if !result.logs.is_empty() {
                self.set_logs(ctx.store(), &tx_hash, &result.logs)?;
            }
        }
        Ok(result)
    }
}

/// The session fields the handlers update next to the object cache.
struct SessionMeta<'a> {
    block_hash: &'a Hash,
    bloom: &'a mut Bloom,
    tx_count: &'a mut u64,
}

fn split_session(session: &mut BlockSession) -> (&mut CommitStateDb, SessionMeta<'_>) {
    let BlockSession {
        block_hash,
        bloom,
        tx_count,
        state,
        ..
    } = session;
    (
        state,
        SessionMeta {
            block_hash,
            bloom,
            tx_count,
        },
    )
}
