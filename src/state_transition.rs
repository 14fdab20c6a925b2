//! Execution of one validated Ethereum-format transaction against the state object cache.
use log::{debug, info};
use rlp_derive::{RlpDecodable, RlpEncodable};

use crate::common::{Addr, Bloom, Bytes, Gas, Hash, Log, NullableAddr, Wei, U256};
use crate::context::{Context, Event};
use crate::error::{Error, Result};
use crate::evm::{Evm, EvmContext, StateDb};
use crate::gas::OutOfGas;
use crate::keeper::get_height_hash;
use crate::params::{intrinsic_gas, ChainConfig, Params};
use crate::state::CommitStateDb;

pub const EVENT_TYPE_ETHEREUM_TX: &str = "ethereum_tx";
pub const EVENT_TYPE_MESSAGE: &str = "message";
pub const ATTRIBUTE_KEY_AMOUNT: &str = "amount";
pub const ATTRIBUTE_KEY_RECIPIENT: &str = "recipient";
pub const ATTRIBUTE_KEY_SENDER: &str = "sender";
pub const ATTRIBUTE_KEY_MODULE: &str = "module";
pub const MODULE_NAME: &str = "ethereum";

/// Payload returned to the client for a successful transaction.
#[derive(RlpEncodable, RlpDecodable, Clone, PartialEq, Eq, Debug)]
pub struct ResultData {
    /// Set for contract creations only.
    pub contract_address: NullableAddr,
    pub bloom: Bloom,
    pub logs: Vec<Log>,
    pub ret: Bytes,
    pub tx_hash: Hash,
}

pub fn encode_result_data(data: &ResultData) -> Bytes {
    rlp::encode(data).to_vec().into()
}

pub fn decode_result_data(bytes: &[u8]) -> Result<ResultData> {
    Ok(rlp::decode(bytes)?)
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct GasInfo {
    pub gas_limit: Gas,
    pub gas_consumed: Gas,
    pub gas_refunded: Gas,
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct TxResult {
    /// Encoded [ResultData].
    pub data: Bytes,
    pub log: String,
}

#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub logs: Vec<Log>,
    pub bloom: Bloom,
    pub result: TxResult,
    pub gas_info: GasInfo,
}

/// Everything needed to run one transaction.
pub struct StateTransition<'a> {
    pub account_nonce: u64,
    pub price: Wei,
    pub gas_limit: Gas,
    /// `None` for contract creation.
    pub recipient: Option<Addr>,
    pub amount: Wei,
    pub payload: Bytes,
    pub csdb: &'a mut CommitStateDb,
    pub chain_id: U256,
    /// Absent for admission-time dry runs.
    pub tx_hash: Option<Hash>,
    pub sender: Addr,
    /// Run against a throwaway copy of the cache and write nothing.
    pub simulate: bool,
}

impl<'a> StateTransition<'a> {
    fn evm_context(
        &self, ctx: &Context, config: &ChainConfig, params: &Params,
    ) -> EvmContext {
        let height = ctx.block_height();
        let store = ctx.store().clone();
        EvmContext {
            origin: self.sender.clone(),
            gas_price: self.price.clone(),
            coinbase: Addr::default(),
            block_number: height.into(),
            timestamp: ctx.block_time().into(),
            difficulty: U256::zero(),
            gas_limit: ctx.block_gas_meter().limit(),
            chain_id: self.chain_id,
            fork: config.fork_at(height),
            extra_eips: params.extra_eips.clone(),
            block_hash_getter: Box::new(move |n| {
                get_height_hash(&store, n).unwrap_or_default()
            }),
        }
    }

    /// Apply the transaction. The ante pipeline has already validated it,
    /// charged the fee and advanced the sender's sequence.
    pub fn transition_db(
        &mut self, ctx: &mut Context, config: &ChainConfig, params: &Params,
        evm: &dyn Evm,
    ) -> Result<ExecutionResult> {
        let contract_creation = self.recipient.is_none();
        let height = ctx.block_height();
        let intrinsic = intrinsic_gas(
            &self.payload,
            contract_creation,
            config.is_homestead(height),
            config.is_istanbul(height),
        )?;

        let consumed = ctx.gas_meter().gas_consumed();
        let mut gas_limit = self.gas_limit.checked_sub(consumed).ok_or_else(|| {
            Error::GasMeter(OutOfGas {
                descriptor: "state transition".into(),
                limit: self.gas_limit,
                wanted: consumed,
            })
        })?;

        let evm_ctx = self.evm_context(ctx, config, params);
        self.csdb.set_height(height);

        let mut sim_copy;
        let csdb: &mut CommitStateDb = if self.simulate {
            // price the dry run like a full Ethereum transaction
            gas_limit = self.gas_limit.checked_sub(intrinsic).ok_or(
                Error::IntrinsicGasTooLow {
                    got: self.gas_limit,
                    required: intrinsic,
                },
            )?;
            if consumed < intrinsic {
                ctx.gas_meter_mut()
                    .consume_gas(intrinsic - consumed, "intrinsic gas match")?;
            }
            sim_copy = self.csdb.copy();
            &mut sim_copy
        } else {
            &mut *self.csdb
        };

        csdb.update_accounts();

        if contract_creation && !params.enable_create {
            return Err(Error::InvalidTx("contract creation is disabled".into()))
        }
        if !contract_creation && !params.enable_call {
            return Err(Error::InvalidTx("contract call is disabled".into()))
        }

        let snapshot = csdb.snapshot();

        // contract addresses derive from the declared nonce
        let current_nonce = csdb.get_nonce(&self.sender);
        csdb.set_nonce(&self.sender, self.account_nonce);

        let (outcome, recipient_log) = match &self.recipient {
            None => {
                let outcome = evm.create(
                    &evm_ctx,
                    &mut *csdb,
                    &self.sender,
                    &self.payload,
                    gas_limit,
                    &self.amount,
                );
                let addr = outcome
                    .contract_addr
                    .as_ref()
                    .map(|a| a.to_hex())
                    .unwrap_or_default();
                (outcome, format!("contract address {}", addr))
            }
            Some(to) => {
                let nonce = csdb.get_nonce(&self.sender);
                csdb.set_nonce(&self.sender, nonce.saturating_add(1));
                let outcome = evm.call(
                    &evm_ctx,
                    &mut *csdb,
                    &self.sender,
                    to,
                    &self.payload,
                    gas_limit,
                    &self.amount,
                );
                (outcome, format!("recipient address {}", to.to_hex()))
            }
        };

        let gas_consumed = gas_limit.saturating_sub(outcome.left_over_gas);

        if let Err(e) = outcome.status {
            csdb.revert_to_snapshot(snapshot);
            debug!("EVM execution failed: {} (gas consumed = {})", e, gas_consumed);
            ctx.gas_meter_mut()
                .consume_gas(gas_consumed, "evm execution consumption")?;
            return Err(Error::Vm(e))
        }

        // the ante pipeline owns the persisted sequence
        csdb.set_nonce(&self.sender, current_nonce);

        let (logs, bloom) = match (&self.tx_hash, self.simulate) {
            (Some(tx_hash), false) => {
                let logs = csdb.get_logs(tx_hash);
                let bloom = Bloom::from_logs(&logs);
                (logs, bloom)
            }
            _ => (Vec::new(), Bloom::default()),
        };

        if !self.simulate {
            csdb.finalize(true);
        }

        let result_data = ResultData {
            contract_address: NullableAddr(if contract_creation {
                outcome.contract_addr.clone()
            } else {
                None
            }),
            bloom: bloom.clone(),
            logs: logs.clone(),
            ret: outcome.ret.clone(),
            tx_hash: self.tx_hash.clone().unwrap_or_default(),
        };
        let result_log = format!(
            "executed EVM state transition; sender address {}; {}",
            self.sender.to_hex(),
            recipient_log
        );
        info!("{}", result_log);

        ctx.emit_event(
            Event::new(EVENT_TYPE_ETHEREUM_TX)
                .attr(ATTRIBUTE_KEY_AMOUNT, &self.amount),
        );
        ctx.emit_event(
            Event::new(EVENT_TYPE_MESSAGE)
                .attr(ATTRIBUTE_KEY_MODULE, MODULE_NAME)
                .attr(ATTRIBUTE_KEY_SENDER, self.sender.to_hex()),
        );
        if let Some(to) = &self.recipient {
            ctx.emit_event(
                Event::new(EVENT_TYPE_ETHEREUM_TX)
                    .attr(ATTRIBUTE_KEY_RECIPIENT, to.to_hex()),
            );
        }

        ctx.gas_meter_mut()
            .consume_gas(gas_consumed, "EVM execution consumption")?;

        Ok(ExecutionResult {
            logs,
            bloom,
            result: TxResult {
                data: encode_result_data(&result_data),
                log: result_log,
            },
            gas_info: GasInfo {
                gas_limit,
                gas_consumed,
                gas_refunded: outcome.left_over_gas,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_data_roundtrip() {
        let log = Log {
            address: Addr::from([3; 20]),
            topics: vec![Hash::hash(b"topic")],
            data: vec![1, 2, 3].into(),
            block_number: 7,
            tx_hash: Hash::hash(b"tx"),
            tx_index: 1,
            index: 0,
            ..Default::default()
        };
        let data = ResultData {
            contract_address: NullableAddr(Some(Addr::from([5; 20]))),
            bloom: Bloom::from_logs(&[log.clone()]),
            logs: vec![log],
            ret: vec![0xde, 0xad].into(),
            tx_hash: Hash::hash(b"tx"),
        };
        let decoded = decode_result_data(&encode_result_data(&data)).unwrap();
        assert_eq!(decoded, data);

        let call = ResultData {
            contract_address: NullableAddr(None),
            bloom: Bloom::default(),
            logs: Vec::new(),
            ret: Bytes::empty(),
            tx_hash: Hash::default(),
        };
        let decoded = decode_result_data(&encode_result_data(&call)).unwrap();
        assert_eq!(decoded.contract_address, NullableAddr(None));
        assert!(decode_result_data(&[0xc1]).is_err());
    }
}
