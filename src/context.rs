use crate::auth::Coin;
use crate::common::{Gas, Hash};
use crate::gas::GasMeter;
use crate::store::StoreHandle;

/// Block header fields the host consensus engine hands to every phase.
#[derive(Clone, Default, Debug)]
pub struct Header {
    pub height: u64,
    /// Block time, seconds since the epoch.
    pub time: u64,
    /// Chain identifier of the form `<name>-<epoch>`.
    pub chain_id: String,
    pub hash: Hash,
    pub last_block_hash: Hash,
    /// Maximum gas of the block; zero means unlimited.
    pub gas_limit: Gas,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecMode {
    /// Admission of a new transaction into the mempool.
    Check,
    /// Re-admission of a pending transaction after a commit.
    ReCheck,
    Deliver,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Event {
    pub ty: String,
    pub attributes: Vec<(String, String)>,
}

impl Event {
    pub fn new(ty: &str) -> Self {
        Self {
            ty: ty.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.push((key.into(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Execution context of one transaction (or block hook).
#[derive(Clone)]
pub struct Context {
    store: StoreHandle,
    header: Header,
    mode: ExecMode,
    gas_meter: GasMeter,
    block_gas_meter: GasMeter,
    min_gas_prices: Vec<Coin>,
    events: Vec<Event>,
}

impl Context {
    pub fn new(store: StoreHandle, header: Header, mode: ExecMode) -> Self {
        let block_gas_meter = if header.gas_limit == 0 {
            GasMeter::infinite()
        } else {
            GasMeter::new(header.gas_limit)
        };
        Self {
            store,
            header,
            mode,
            gas_meter: GasMeter::infinite(),
            block_gas_meter,
            min_gas_prices: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn block_height(&self) -> u64 {
        self.header.height
    }

    pub fn block_time(&self) -> u64 {
        self.header.time
    }

    pub fn chain_id(&self) -> &str {
        &self.header.chain_id
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// True for both admission modes.
    pub fn is_check_tx(&self) -> bool {
        matches!(self.mode, ExecMode::Check | ExecMode::ReCheck)
    }

    pub fn is_recheck_tx(&self) -> bool {
        self.mode == ExecMode::ReCheck
    }

    pub fn gas_meter(&self) -> &GasMeter {
        &self.gas_meter
    }

    pub fn gas_meter_mut(&mut self) -> &mut GasMeter {
        &mut self.gas_meter
    }

    /// Install a new meter, returning the previous one.
    pub fn set_gas_meter(&mut self, meter: GasMeter) -> GasMeter {
        std::mem::replace(&mut self.gas_meter, meter)
    }

    pub fn block_gas_meter(&self) -> &GasMeter {
        &self.block_gas_meter
    }

    pub fn block_gas_meter_mut(&mut self) -> &mut GasMeter {
        &mut self.block_gas_meter
    }

    pub fn min_gas_prices(&self) -> &[Coin] {
        &self.min_gas_prices
    }

    pub fn with_min_gas_prices(mut self, prices: Vec<Coin>) -> Self {
        self.min_gas_prices = prices;
        self
    }

    pub fn with_store(mut self, store: StoreHandle) -> Self {
        self.store = store;
        self
    }

    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_gas_meter(mut self, meter: GasMeter) -> Self {
        self.gas_meter = meter;
        self
    }

    /// Share a block meter across the transactions of a block.
    pub fn with_block_gas_meter(mut self, meter: GasMeter) -> Self {
        self.block_gas_meter = meter;
        self
    }

    pub fn emit_event(&mut self, event: Event) {
        self.events.push(event)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
