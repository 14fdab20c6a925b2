//! A deterministic stand-in interpreter.
//!
//! [DummyEvm] understands value transfers, contract creation (the init code is stored as the
//! runtime code) and a handful of one-byte instructions that are enough to exercise the
//! host: logging, storage writes, returning data, reverting and running out of gas. Each
//! instruction of the called contract runs once, in order, with the call input as its
//! operand.
use log::debug;

use evmhost::common::{create_addr, Addr, Bytes, Gas, Hash, Wei};
use evmhost::evm::{
    can_transfer, transfer, Evm, EvmContext, ExecError, ExecOutcome, StateDb,
};

/// Stop executing.
pub const OP_STOP: u8 = 0x00;
/// Store `keccak(input)` under [slot_key].
pub const OP_SSTORE: u8 = 0x55;
/// Emit a log with topic `keccak(input)` and the input as data.
pub const OP_LOG: u8 = 0xa0;
/// Return the input.
pub const OP_RETURN: u8 = 0xf3;
/// Revert everything the call did.
pub const OP_REVERT: u8 = 0xfd;
/// Burn all remaining gas.
pub const OP_INVALID: u8 = 0xfe;

pub const GAS_SSTORE: Gas = 20000;
pub const GAS_LOG: Gas = 375;
pub const GAS_STEP: Gas = 3;
pub const GAS_CODE_DEPOSIT: Gas = 200;

/// Slot written by [OP_SSTORE].
pub fn slot_key() -> Hash {
    Hash::hash(b"dummy.slot")
}

#[derive(Clone, Default, Debug)]
pub struct DummyEvm;

impl DummyEvm {
    pub fn new() -> Self {
        Self
    }

    fn run(
        &self, state: &mut dyn StateDb, addr: &Addr, code: &[u8], input: &[u8],
        gas: Gas,
    ) -> (Result<(), ExecError>, Bytes, Gas) {
        let mut gas_left = gas;
        let mut ret = Bytes::empty();
        for op in code.iter() {
            let cost = match *op {
                OP_SSTORE => GAS_SSTORE,
                OP_LOG => GAS_LOG,
                OP_INVALID => gas_left,
                _ => GAS_STEP,
            };
            if cost > gas_left || *op == OP_INVALID {
                return (Err(ExecError::OutOfGas), Bytes::empty(), 0)
            }
            gas_left -= cost;
            match *op {
                OP_STOP => break,
                OP_SSTORE => {
                    state.set_state(addr, &slot_key(), Hash::hash(input))
                }
                OP_LOG => state.add_log(addr, vec![Hash::hash(input)], input.into()),
                OP_RETURN => {
                    ret = input.into();
                    break
                }
                OP_REVERT => {
                    return (Err(ExecError::Reverted), input.into(), gas_left)
                }
                _ => (),
            }
        }
        (Ok(()), ret, gas_left)
    }
}

impl Evm for DummyEvm {
    fn create(
        &self, _ctx: &EvmContext, state: &mut dyn StateDb, caller: &Addr,
        code: &[u8], gas: Gas, value: &Wei,
    ) -> ExecOutcome {
        if !can_transfer(state, caller, value) {
            return ExecOutcome {
                ret: Bytes::empty(),
                left_over_gas: gas,
                contract_addr: None,
                status: Err(ExecError::InsufficientBalance),
            }
        }
        let nonce = state.get_nonce(caller);
        state.set_nonce(caller, nonce + 1);
        let addr = create_addr(caller, nonce);
        debug!("dummy create {} (nonce = {})", addr, nonce);

        let snapshot = state.snapshot();
        state.create_account(&addr);
        state.set_nonce(&addr, 1);
        transfer(state, caller, &addr, value);

        let deposit = GAS_CODE_DEPOSIT.saturating_mul(code.len() as Gas);
        if deposit > gas {
            state.revert_to_snapshot(snapshot);
            return ExecOutcome {
                ret: Bytes::empty(),
                left_over_gas: 0,
                contract_addr: Some(addr),
                status: Err(ExecError::CodeStoreOutOfGas),
            }
        }
        state.set_code(&addr, code.into());
        ExecOutcome {
            ret: Bytes::empty(),
            left_over_gas: gas - deposit,
            contract_addr: Some(addr),
            status: Ok(()),
        }
    }

    fn call(
        &self, _ctx: &EvmContext, state: &mut dyn StateDb, caller: &Addr,
        to: &Addr, input: &[u8], gas: Gas, value: &Wei,
    ) -> ExecOutcome {
        if !can_transfer(state, caller, value) {
            return ExecOutcome {
                ret: Bytes::empty(),
                left_over_gas: gas,
                contract_addr: None,
                status: Err(ExecError::InsufficientBalance),
            }
        }
        let snapshot = state.snapshot();
        if !state.exist(to) {
            state.create_account(to);
        }
        transfer(state, caller, to, value);

        let code = state.get_code(to);
        let (status, ret, left_over_gas) = self.run(state, to, &code, input, gas);
        if status.is_err() {
            debug!("dummy call to {} failed: {:?}", to, status);
            state.revert_to_snapshot(snapshot);
        }
        ExecOutcome {
            ret,
            left_over_gas,
            contract_addr: None,
            status,
        }
    }
}
