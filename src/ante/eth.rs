//! Decorators for Ethereum-format transactions.
use std::sync::Arc;

use log::debug;

use super::{chain, AnteChain, AnteDecorator, Next};
use crate::auth::{AccountKeeper, BankKeeper, Coins};
use crate::common::Wei;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gas::GasMeter;
use crate::keeper::Keeper;
use crate::params::{intrinsic_gas, parse_chain_id};
use crate::tx::EthTx;

/// Runs everything after it under an unmetered context and converts a
/// raw out-of-gas signal raised further down into [Error::OutOfGas].
pub struct EthSetupContext;

impl AnteDecorator<EthTx> for EthSetupContext {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        ctx.set_gas_meter(GasMeter::infinite());
        let gas_wanted = tx.gas();
        next.run(ctx, tx, simulate).map_err(|e| {
            let gas_used = ctx.gas_meter().gas_consumed();
            e.into_out_of_gas(gas_wanted, gas_used)
        })
    }
}

pub struct RejectExtensionOptions;

impl AnteDecorator<EthTx> for RejectExtensionOptions {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        if !tx.extension_options.is_empty() {
            return Err(Error::UnknownExtensionOptions)
        }
        next.run(ctx, tx, simulate)
    }
}

/// Mempool spam filter: the fee must cover the node's minimum gas price
/// (in the EVM denom) for the whole gas limit. Only applied when
/// admitting a transaction.
pub struct EthMempoolFee {
    keeper: Arc<Keeper>,
}

impl EthMempoolFee {
    pub fn new(keeper: Arc<Keeper>) -> Self {
        Self { keeper }
    }
}

impl AnteDecorator<EthTx> for EthMempoolFee {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        if !ctx.is_check_tx() || simulate {
            return next.run(ctx, tx, simulate)
        }
        let evm_denom = self.keeper.get_params(ctx.store())?.evm_denom;
        let min_price = ctx
            .min_gas_prices()
            .iter()
            .find(|c| c.denom == evm_denom)
            .map(|c| c.amount.clone())
            .unwrap_or_default();
        if !min_price.is_zero() {
            let required = min_price
                .checked_mul(&Wei::from(tx.gas()))
                .ok_or_else(|| Error::InvalidTx("fee overflow".into()))?;
            let fee = tx
                .fee()
                .ok_or_else(|| Error::InvalidTx("fee overflow".into()))?;
            if fee < required {
                debug!("rejected tx {}: fee {} below {}", tx.hash(), fee, required);
                return Err(Error::InsufficientFee(format!(
                    "got: {}{} required: {}{}",
                    fee, evm_denom, required, evm_denom
                )))
            }
        }
        next.run(ctx, tx, simulate)
    }
}

/// Stateless checks, plus the intrinsic gas floor for the active fork.
pub struct EthValidateBasic {
    keeper: Arc<Keeper>,
}

impl EthValidateBasic {
    pub fn new(keeper: Arc<Keeper>) -> Self {
        Self { keeper }
    }
}

impl AnteDecorator<EthTx> for EthValidateBasic {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        tx.validate_basic()?;
        let config = self.keeper.get_chain_config(ctx.store())?;
        let height = ctx.block_height();
        let intrinsic = intrinsic_gas(
            tx.payload(),
            tx.is_contract_creation(),
            config.is_homestead(height),
            config.is_istanbul(height),
        )?;
        if tx.gas() < intrinsic {
            return Err(Error::IntrinsicGasTooLow {
                got: tx.gas(),
                required: intrinsic,
            })
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct TxTimeoutHeight;

impl AnteDecorator<EthTx> for TxTimeoutHeight {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        let timeout = tx.timeout_height;
        let height = ctx.block_height();
        if timeout > 0 && height > timeout {
            return Err(Error::TxTimeoutHeight { timeout, height })
        }
        next.run(ctx, tx, simulate)
    }
}

/// Recovers the sender for the context's chain ID. The result stays
/// cached on the transaction for the rest of the pipeline and the
/// handler.
pub struct EthSigVerification;

impl AnteDecorator<EthTx> for EthSigVerification {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        let chain_id = parse_chain_id(ctx.chain_id())?;
        tx.verify_sig(&chain_id).map_err(|e| {
            debug!("signature verification failed for {}: {}", tx.hash(), e);
            match e {
                Error::Unauthorized(msg) => Error::Unauthorized(format!(
                    "signature verification failed: {}",
                    msg
                )),
                e => e,
            }
        })?;
        next.run(ctx, tx, simulate)
    }
}

/// Admission-time account checks: the sender exists (it is created when
/// missing), holds a valid account number and can pay the full cost.
pub struct AccountVerification {
    keeper: Arc<Keeper>,
    ak: Arc<dyn AccountKeeper>,
}

impl AccountVerification {
    pub fn new(keeper: Arc<Keeper>, ak: Arc<dyn AccountKeeper>) -> Self {
        Self { keeper, ak }
    }
}

impl AnteDecorator<EthTx> for AccountVerification {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        if !ctx.is_check_tx() {
            return next.run(ctx, tx, simulate)
        }
        let from = tx.from().cloned().ok_or(Error::MissingSender)?;
        let store = ctx.store().clone();
        let acc = match self.ak.get_account(&store, &from) {
            Some(acc) => acc,
            None => {
                let acc = self.ak.new_account_with_address(&store, &from);
                self.ak.set_account(&store, &acc);
                acc
            }
        };
        if ctx.block_height() == 0 && acc.account_number != 0 {
            return Err(Error::InvalidAccountNumber(acc.account_number))
        }
        let evm_denom = self.keeper.get_params(&store)?.evm_denom;
        let balance = acc.balance(&evm_denom);
        let cost = tx
            .cost()
            .ok_or_else(|| Error::InvalidTx("cost overflow".into()))?;
        if balance < cost {
            return Err(Error::InsufficientFunds(format!(
                "{}{} < {}{}",
                balance, evm_denom, cost, evm_denom
            )))
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct NonceVerification {
    ak: Arc<dyn AccountKeeper>,
}

impl NonceVerification {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<EthTx> for NonceVerification {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        let from = tx.from().cloned().ok_or(Error::MissingSender)?;
        let acc = self
            .ak
            .get_account(ctx.store(), &from)
            .ok_or_else(|| Error::UnknownAddress(from.to_hex()))?;
        if tx.nonce() != acc.sequence {
            return Err(Error::InvalidSequence {
                expected: acc.sequence,
                got: tx.nonce(),
            })
        }
        next.run(ctx, tx, simulate)
    }
}

/// Charges `price * gas_limit`, installs a meter bounded by the gas
/// limit and pre-charges the intrinsic gas on it.
pub struct EthGasConsume {
    keeper: Arc<Keeper>,
    ak: Arc<dyn AccountKeeper>,
    bank: Arc<dyn BankKeeper>,
}

impl EthGasConsume {
    pub fn new(
        keeper: Arc<Keeper>, ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>,
    ) -> Self {
        Self { keeper, ak, bank }
    }
}

impl AnteDecorator<EthTx> for EthGasConsume {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        let from = tx.from().cloned().ok_or(Error::MissingSender)?;
        let store = ctx.store().clone();
        if self.ak.get_account(&store, &from).is_none() {
            return Err(Error::UnknownAddress(from.to_hex()))
        }
        let evm_denom = self.keeper.get_params(&store)?.evm_denom;
        let gas_limit = tx.gas();
        if gas_limit != 0 {
            let fee = tx
                .fee()
                .ok_or_else(|| Error::InvalidTx("fee overflow".into()))?;
            self.bank
                .deduct_fees(&store, &from, &Coins::single(&evm_denom, fee))?;
        }

        ctx.set_gas_meter(if simulate {
            GasMeter::infinite()
        } else {
            GasMeter::new(gas_limit)
        });

        let config = self.keeper.get_chain_config(&store)?;
        let height = ctx.block_height();
        let intrinsic = intrinsic_gas(
            tx.payload(),
            tx.is_contract_creation(),
            config.is_homestead(height),
            config.is_istanbul(height),
        )?;
        ctx.gas_meter_mut().consume_gas(intrinsic, "intrinsic gas")?;
        next.run(ctx, tx, simulate)
    }
}

/// Advances the sender's sequence. Pure admission passes leave it alone.
pub struct IncrementSenderSequence {
    ak: Arc<dyn AccountKeeper>,
}

impl IncrementSenderSequence {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<EthTx> for IncrementSenderSequence {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut EthTx, simulate: bool,
        next: Next<'_, EthTx>,
    ) -> Result<()> {
        if ctx.is_check_tx() && !simulate {
            return next.run(ctx, tx, simulate)
        }
        let from = tx.from().cloned().ok_or(Error::MissingSender)?;
        let mut acc = self
            .ak
            .get_account(ctx.store(), &from)
            .ok_or_else(|| Error::UnknownAddress(from.to_hex()))?;
        acc.sequence += 1;
        self.ak.set_account(ctx.store(), &acc);
        next.run(ctx, tx, simulate)
    }
}

pub fn eth_ante_chain(
    keeper: Arc<Keeper>, ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>,
) -> AnteChain<EthTx> {
    chain(vec![
        Box::new(EthSetupContext),
        Box::new(RejectExtensionOptions),
        Box::new(EthMempoolFee::new(keeper.clone())),
        Box::new(EthValidateBasic::new(keeper.clone())),
        Box::new(TxTimeoutHeight),
        Box::new(EthSigVerification),
        Box::new(AccountVerification::new(keeper.clone(), ak.clone())),
        Box::new(NonceVerification::new(ak.clone())),
        Box::new(EthGasConsume::new(keeper, ak.clone(), bank)),
        Box::new(IncrementSenderSequence::new(ak)),
    ])
}
