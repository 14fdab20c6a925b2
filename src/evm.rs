//! The seam between the host and an EVM interpreter.
//!
//! The host never interprets bytecode itself. It prepares an [EvmContext] for the
//! transaction and hands the interpreter a mutable [StateDb]; every read and write the
//! interpreter performs on the world state goes through that trait, so the host can journal,
//! snapshot and revert them.
use crate::common::{Addr, Bytes, Gas, Hash, Wei, U256};
use crate::params::Fork;

#[derive(Copy, Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum ExecError {
    #[error("out of gas")]
    OutOfGas,
    #[error("contract creation code storage out of gas")]
    CodeStoreOutOfGas,
    #[error("max call depth exceeded")]
    Depth,
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("contract address collision")]
    ContractAddrCollision,
    #[error("execution reverted")]
    Reverted,
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("write protection")]
    WriteProtection,
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
    #[error("gas uint64 overflow")]
    GasIntOverflow,
    #[error("invalid code: must not begin with 0xef")]
    InvalidCode,
    #[error("nonce uint64 overflow")]
    NonceIntOverflow,
    #[error("stack limit reached")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid opcode")]
    InvalidOpcode,
}

/// Callback returning the canonical hash of the block at a height, or the
/// zero hash when unknown.
pub type BlockHashGetter = Box<dyn Fn(u64) -> Hash + Send + Sync>;

/// Block and transaction environment the interpreter runs in.
pub struct EvmContext {
    pub origin: Addr,
    pub gas_price: Wei,
    pub coinbase: Addr,
    pub block_number: U256,
    pub timestamp: U256,
    pub difficulty: U256,
    pub gas_limit: Gas,
    pub chain_id: U256,
    pub fork: Fork,
    pub extra_eips: Vec<i64>,
    pub block_hash_getter: BlockHashGetter,
}

/// Result of one top-level call or creation.
#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub ret: Bytes,
    pub left_over_gas: Gas,
    /// Address of the created contract (creations only).
    pub contract_addr: Option<Addr>,
    pub status: Result<(), ExecError>,
}

/// World state as seen by the interpreter.
pub trait StateDb {
    fn create_account(&mut self, addr: &Addr);

    fn sub_balance(&mut self, addr: &Addr, amount: &Wei);
    fn add_balance(&mut self, addr: &Addr, amount: &Wei);
    fn get_balance(&mut self, addr: &Addr) -> Wei;

    fn get_nonce(&mut self, addr: &Addr) -> u64;
    fn set_nonce(&mut self, addr: &Addr, nonce: u64);

    fn get_code_hash(&mut self, addr: &Addr) -> Hash;
    fn get_code(&mut self, addr: &Addr) -> Bytes;
    fn set_code(&mut self, addr: &Addr, code: Bytes);
    fn get_code_size(&mut self, addr: &Addr) -> usize;

    fn add_refund(&mut self, gas: Gas);
    fn sub_refund(&mut self, gas: Gas);
    fn get_refund(&self) -> Gas;

    /// Value of the slot as of the start of the transaction.
    fn get_committed_state(&mut self, addr: &Addr, key: &Hash) -> Hash;
    fn get_state(&mut self, addr: &Addr, key: &Hash) -> Hash;
    fn set_state(&mut self, addr: &Addr, key: &Hash, value: Hash);

    /// Mark the account for deletion at the end of the transaction and
    /// clear its balance. Returns false when the account does not exist.
    fn suicide(&mut self, addr: &Addr) -> bool;
    fn has_suicided(&mut self, addr: &Addr) -> bool;

    fn exist(&mut self, addr: &Addr) -> bool;
    /// EIP-161 emptiness: no nonce, no balance and no code.
    fn empty(&mut self, addr: &Addr) -> bool;

    fn prepare_access_list(
        &mut self, sender: &Addr, dest: Option<&Addr>, precompiles: &[Addr],
    );
    fn address_in_access_list(&self, addr: &Addr) -> bool;
    /// (address present, slot present)
    fn slot_in_access_list(&self, addr: &Addr, slot: &Hash) -> (bool, bool);
    fn add_address_to_access_list(&mut self, addr: &Addr);
    fn add_slot_to_access_list(&mut self, addr: &Addr, slot: &Hash);

    fn snapshot(&mut self) -> usize;
    fn revert_to_snapshot(&mut self, id: usize);

    fn add_log(&mut self, address: &Addr, topics: Vec<Hash>, data: Bytes);
    fn add_preimage(&mut self, hash: &Hash, preimage: &[u8]);
}

/// An EVM interpreter. Implementations must revert their own state
/// changes on failure before returning.
pub trait Evm: Send + Sync {
    fn create(
        &self, ctx: &EvmContext, state: &mut dyn StateDb, caller: &Addr,
        code: &[u8], gas: Gas, value: &Wei,
    ) -> ExecOutcome;

    fn call(
        &self, ctx: &EvmContext, state: &mut dyn StateDb, caller: &Addr,
        to: &Addr, input: &[u8], gas: Gas, value: &Wei,
    ) -> ExecOutcome;
}

pub fn can_transfer(state: &mut dyn StateDb, addr: &Addr, amount: &Wei) -> bool {
    &state.get_balance(addr) >= amount
}

/// Move `amount` between accounts; the caller checks [can_transfer]
/// first.
pub fn transfer(state: &mut dyn StateDb, from: &Addr, to: &Addr, amount: &Wei) {
    state.sub_balance(from, amount);
    state.add_balance(to, amount);
}
