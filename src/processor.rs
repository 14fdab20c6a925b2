//! Sequential block processor driven by the host consensus engine.
//!
//! The engine calls into the processor in a fixed order for every block: [BlockProcessor::begin_block],
//! any number of [BlockProcessor::deliver_tx], [BlockProcessor::end_block] and finally
//! [BlockProcessor::commit]. Between commits it may also ask for mempool admission
//! ([BlockProcessor::check_tx]) and for dry runs ([BlockProcessor::simulate_tx]).
//!
//! Three views of the state exist at any time:
//!
//! - the committed root ([MemStore]), which only [BlockProcessor::commit] writes;
//! - the deliver branch of the block being executed, a write buffer over the root;
//! - the check branch, a write buffer over the root used for admission. Fees charged to
//!   admitted transactions accumulate there until the next commit throws it away.
//!
//! Each transaction runs its admission pipeline on a branch of its own, which is written back
//! as soon as the pipeline passes: fee deduction and the sequence increment survive a failed
//! execution. Execution then runs on a second branch that is written back only on success.
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::ante::AnteHandler;
use crate::auth::{AccountKeeper, BankKeeper, Coin};
use crate::common::{Bloom, Bytes, Gas, Hash};
use crate::config::Config;
use crate::context::{Context, Event, ExecMode, Header};
use crate::error::{Error, Result};
use crate::evm::Evm;
use crate::gas::GasMeter;
use crate::genesis::{export_genesis, init_genesis, GenesisState};
use crate::handler::Handler;
use crate::keeper::{BlockSession, Keeper};
use crate::querier::Querier;
use crate::state_transition::TxResult;
use crate::store::{Branch, KvStore, MemStore, StoreHandle};
use crate::tx::Tx;

/// Outcome of one transaction as reported to the consensus engine.
#[derive(Clone, Default, Debug)]
pub struct TxResponse {
    /// Zero on success, otherwise [Error::code].
    pub code: u32,
    pub log: String,
    pub data: Bytes,
    pub gas_wanted: Gas,
    pub gas_used: Gas,
    pub events: Vec<Event>,
    pub error: Option<Error>,
}

impl TxResponse {
    fn ok(res: TxResult, gas_wanted: Gas, gas_used: Gas, events: Vec<Event>) -> Self {
        Self {
            code: 0,
            log: res.log,
            data: res.data,
            gas_wanted,
            gas_used,
            events,
            error: None,
        }
    }

    fn err(err: Error, gas_wanted: Gas, gas_used: Gas) -> Self {
        Self {
            code: err.code(),
            log: err.to_string(),
            data: Bytes::empty(),
            gas_wanted,
            gas_used,
            events: Vec::new(),
            error: Some(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

struct DeliverState {
    header: Header,
    branch: Branch,
    session: BlockSession,
    block_gas_meter: GasMeter,
}

struct CheckState {
    header: Header,
    branch: Branch,
    session: BlockSession,
}

pub struct BlockProcessor {
    root: Arc<RwLock<MemStore>>,
    config: Config,
    min_gas_prices: Vec<Coin>,
    keeper: Arc<Keeper>,
    ante: AnteHandler,
    handler: Handler,
    querier: Querier,
    check: Option<CheckState>,
    deliver: Option<DeliverState>,
    /// Written by `end_block`, flushed into the root by `commit`.
    pending: Option<(Header, Branch)>,
    last_header: Header,
}

impl BlockProcessor {
    pub fn new(
        config: Config, ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>,
        evm: Arc<dyn Evm>,
    ) -> Result<Self> {
        config.validate()?;
        let min_gas_prices = config.min_gas_prices()?;
        let keeper = Arc::new(Keeper::new(ak.clone(), bank.clone(), evm));
        let root = Arc::new(RwLock::new(MemStore::new()));
        Ok(Self {
            ante: AnteHandler::new(keeper.clone(), ak, bank),
            handler: Handler::new(keeper.clone()),
            querier: Querier::new(keeper.clone(), root.clone()),
            last_header: Header {
                chain_id: config.chain_id.clone(),
                ..Default::default()
            },
            root,
            config,
            min_gas_prices,
            keeper,
            check: None,
            deliver: None,
            pending: None,
        })
    }

    pub fn keeper(&self) -> &Arc<Keeper> {
        &self.keeper
    }

    pub fn querier(&self) -> &Querier {
        &self.querier
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to the committed root store.
    pub fn root_store(&self) -> StoreHandle {
        let shared: Arc<RwLock<dyn KvStore>> = self.root.clone();
        StoreHandle::from_shared(shared)
    }

    pub fn last_header(&self) -> &Header {
        &self.last_header
    }

    /// Import the genesis state into the root and open the admission
    /// state on top of it.
    pub fn init_chain(&mut self, time: u64, genesis: &GenesisState) -> Result<()> {
        if self.check.is_some() || self.root.read().latest_version().is_some() {
            return Err(Error::InvalidState("chain is already initialized".into()))
        }
        let header = Header {
            time,
            chain_id: self.config.chain_id.clone(),
            ..Default::default()
        };
        let branch = self.root_store().branch();
        let ctx = Context::new(branch.handle(), header.clone(), ExecMode::Deliver);
        init_genesis(&ctx, &self.keeper, genesis)?;
        branch.write();
        info!(
            "initialized chain {} with {} genesis accounts",
            header.chain_id,
            genesis.accounts.len()
        );
        self.last_header = header;
        self.reset_check_state()
    }

    pub fn export_genesis(&self) -> Result<GenesisState> {
        let ctx = Context::new(
            self.root_store(),
            self.last_header.clone(),
            ExecMode::Deliver,
        );
        export_genesis(&ctx, &self.keeper)
    }

    fn reset_check_state(&mut self) -> Result<()> {
        let branch = self.root_store().branch();
        let header = self.last_header.clone();
        let ctx = Context::new(branch.handle(), header.clone(), ExecMode::Check);
        let session = self.keeper.new_session(&ctx)?;
        self.check = Some(CheckState {
            header,
            branch,
            session,
        });
        Ok(())
    }

    pub fn begin_block(&mut self, mut header: Header) -> Result<()> {
        if self.deliver.is_some() || self.pending.is_some() {
            return Err(Error::InvalidState(
                "previous block is not committed".into(),
            ))
        }
        if header.chain_id.is_empty() {
            header.chain_id = self.config.chain_id.clone();
        } else if header.chain_id != self.config.chain_id {
            return Err(Error::InvalidChainId(format!(
                "block chain id {} does not match {}",
                header.chain_id, self.config.chain_id
            )))
        }
        if header.gas_limit == 0 {
            header.gas_limit = self.config.block_gas_limit;
        }
        let branch = self.root_store().branch();
        let ctx = Context::new(branch.handle(), header.clone(), ExecMode::Deliver);
        let session = self.keeper.begin_block(&ctx)?;
        let block_gas_meter = ctx.block_gas_meter().clone();
        self.deliver = Some(DeliverState {
            header,
            branch,
            session,
            block_gas_meter,
        });
        Ok(())
    }

    /// Admit a transaction into the mempool. The admission pipeline runs
    /// against the check state and its writes are kept there; execution
    /// is a dry run.
    pub fn check_tx(&mut self, bytes: &[u8], recheck: bool) -> TxResponse {
        let mode = if recheck {
            ExecMode::ReCheck
        } else {
            ExecMode::Check
        };
        let mut tx = match Tx::decode(bytes) {
            Ok(tx) => tx,
            Err(e) => return TxResponse::err(e, 0, 0),
        };
        let gas_wanted = tx.gas();
        let check = match self.check.as_mut() {
            Some(check) => check,
            None => {
                return TxResponse::err(
                    Error::InvalidState("chain is not initialized".into()),
                    gas_wanted,
                    0,
                )
            }
        };
        let ctx = Context::new(check.branch.handle(), check.header.clone(), mode)
            .with_min_gas_prices(self.min_gas_prices.clone());
        let res = run_tx(
            &self.ante,
            &self.handler,
            ctx,
            &check.branch.handle(),
            &mut check.session,
            &mut tx,
            false,
            false,
        );
        if let Err(e) = &res.0 {
            debug!("check tx {} rejected: {}", tx.hash(), e);
        }
        res.into_response(gas_wanted)
    }

    /// Dry run against the check state; nothing is kept.
    pub fn simulate_tx(&mut self, bytes: &[u8]) -> TxResponse {
        let mut tx = match Tx::decode(bytes) {
            Ok(tx) => tx,
            Err(e) => return TxResponse::err(e, 0, 0),
        };
        let gas_wanted = tx.gas();
        let check = match self.check.as_mut() {
            Some(check) => check,
            None => {
                return TxResponse::err(
                    Error::InvalidState("chain is not initialized".into()),
                    gas_wanted,
                    0,
                )
            }
        };
        let scratch = check.branch.handle().branch();
        let ctx = Context::new(scratch.handle(), check.header.clone(), ExecMode::Check);
        run_tx(
            &self.ante,
            &self.handler,
            ctx,
            &scratch.handle(),
            &mut check.session,
            &mut tx,
            true,
            false,
        )
        .into_response(gas_wanted)
    }

    /// Validate and execute a transaction of the current block.
    pub fn deliver_tx(&mut self, bytes: &[u8]) -> TxResponse {
        let mut tx = match Tx::decode(bytes) {
            Ok(tx) => tx,
            Err(e) => return TxResponse::err(e, 0, 0),
        };
        let gas_wanted = tx.gas();
        let deliver = match self.deliver.as_mut() {
            Some(deliver) => deliver,
            None => {
                return TxResponse::err(
                    Error::InvalidState("no block in progress".into()),
                    gas_wanted,
                    0,
                )
            }
        };
        if deliver.block_gas_meter.is_out_of_gas() {
            let used = deliver.block_gas_meter.gas_consumed_to_limit();
            return TxResponse::err(
                Error::OutOfGas {
                    location: "no block gas left to run tx".into(),
                    gas_wanted,
                    gas_used: used,
                },
                gas_wanted,
                0,
            )
        }
        let ctx = Context::new(
            deliver.branch.handle(),
            deliver.header.clone(),
            ExecMode::Deliver,
        )
        .with_block_gas_meter(deliver.block_gas_meter.clone());
        let outcome = run_tx(
            &self.ante,
            &self.handler,
            ctx,
            &deliver.branch.handle(),
            &mut deliver.session,
            &mut tx,
            false,
            true,
        );
        if let Err(e) = deliver
            .block_gas_meter
            .consume_gas(outcome.1, "block gas meter")
        {
            warn!("block gas limit reached: {}", e);
        }
        match &outcome.0 {
            Ok(_) => debug!("delivered tx {}", tx.hash()),
            Err(e) => debug!("tx {} failed: {}", tx.hash(), e),
        }
        outcome.into_response(gas_wanted)
    }

    /// Close the block: flush the object cache and persist the block
    /// bloom. The block's writes stay pending until [BlockProcessor::commit].
    pub fn end_block(&mut self) -> Result<Bloom> {
        let DeliverState {
            header,
            branch,
            session,
            ..
        } = self
            .deliver
            .take()
            .ok_or_else(|| Error::InvalidState("no block in progress".into()))?;
        let ctx = Context::new(branch.handle(), header.clone(), ExecMode::Deliver);
        let bloom = self.keeper.end_block(&ctx, session)?;
        self.pending = Some((header, branch));
        Ok(bloom)
    }

    /// Persist the finished block and return the new app hash.
    pub fn commit(&mut self) -> Result<Hash> {
        let (header, branch) = self
            .pending
            .take()
            .ok_or_else(|| Error::InvalidState("no finished block to commit".into()))?;
        branch.write();
        let app_hash = self.root.write().commit(header.height);
        info!("committed block {} (app hash = {})", header.height, app_hash);
        self.last_header = header;
        self.reset_check_state()?;
        Ok(app_hash)
    }

    pub fn query(&self, path: &str, height: Option<u64>) -> Result<Vec<u8>> {
        self.querier.query(path, height)
    }
}

/// Result of [run_tx] together with the gas it used.
struct TxOutcome(Result<TxResult>, Gas, Vec<Event>);

impl TxOutcome {
    fn into_response(self, gas_wanted: Gas) -> TxResponse {
        let TxOutcome(res, gas_used, events) = self;
        match res {
            Ok(res) => TxResponse::ok(res, gas_wanted, gas_used, events),
            Err(e) => TxResponse::err(e, gas_wanted, gas_used),
        }
    }
}

/// Admission then execution of one transaction on top of `store`.
/// Admission writes are flushed into `store` once the pipeline passes;
/// execution writes only when `commit_exec` is set and the handler
/// succeeds.
#[allow(clippy::too_many_arguments)]
fn run_tx(
    ante: &AnteHandler, handler: &Handler, ctx: Context, store: &StoreHandle,
    session: &mut BlockSession, tx: &mut Tx, simulate: bool, commit_exec: bool,
) -> TxOutcome {
    let ante_branch = store.branch();
    let mut ctx = ctx.with_store(ante_branch.handle());
    if let Err(e) = ante.handle(&mut ctx, tx, simulate) {
        return TxOutcome(Err(e), ctx.gas_meter().gas_consumed_to_limit(), Vec::new())
    }
    ante_branch.write();
    let mut events = ctx.take_events();

    let exec_branch = store.branch();
    let mut ctx = ctx.with_store(exec_branch.handle());
    let res = handler.handle(&mut ctx, session, tx);
    let gas_used = ctx.gas_meter().gas_consumed_to_limit();
    match res {
        Ok(res) => {
            if commit_exec {
                exec_branch.write();
            }
            events.extend(ctx.take_events());
            TxOutcome(Ok(res), gas_used, events)
        }
        Err(e) => TxOutcome(Err(e.into_out_of_gas(tx.gas(), gas_used)), gas_used, Vec::new()),
    }
}
