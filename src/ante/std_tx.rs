//! Decorators for standard-format transactions.
use std::sync::Arc;

use log::debug;

use super::{chain, AnteChain, AnteDecorator, Next};
use crate::auth::{Account, AccountKeeper, BankKeeper, Coin, Coins};
use crate::common::{Addr, Bytes, Wei};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gas::GasMeter;
use crate::store::StoreHandle;
use crate::tx::{compressed_pubkey_address, verify_secp256k1, StdMsg, StdTx};

fn signer_account(
    ak: &dyn AccountKeeper, store: &StoreHandle, addr: &Addr,
) -> Result<Account> {
    ak.get_account(store, addr)
        .ok_or_else(|| Error::UnknownAddress(addr.to_hex()))
}

/// Public key a signature is checked against: the one carried by the
/// signature, else the one already bound to the account.
fn signing_key(acc: &Account, sig_key: &Bytes) -> Result<Bytes> {
    if !sig_key.is_empty() {
        return Ok(sig_key.clone())
    }
    acc.pub_key().cloned().ok_or_else(|| {
        Error::InvalidPubKey(format!("pubkey on account {} is not set", acc.address))
    })
}

/// Installs the meter bounded by the declared fee gas and converts a raw
/// out-of-gas signal raised further down into [Error::OutOfGas].
pub struct SetUpContext;

impl AnteDecorator<StdTx> for SetUpContext {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let gas_wanted = tx.fee.gas;
        // genesis transactions are not metered
        ctx.set_gas_meter(if simulate || ctx.block_height() == 0 {
            GasMeter::infinite()
        } else {
            GasMeter::new(gas_wanted)
        });
        next.run(ctx, tx, simulate).map_err(|e| {
            let gas_used = ctx.gas_meter().gas_consumed();
            e.into_out_of_gas(gas_wanted, gas_used)
        })
    }
}

/// A transaction carries at least one message; when admitting, an
/// Ethereum message must travel alone. No Ethereum message may ask for more
/// gas than the fee declares.
pub struct ValidateMsg;

impl AnteDecorator<StdTx> for ValidateMsg {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        if tx.msgs.is_empty() {
            return Err(Error::InvalidTx("no messages included in transaction".into()))
        }
        if ctx.is_check_tx() &&
            tx.msgs.len() > 1 &&
            tx.msgs.iter().any(|m| matches!(m, StdMsg::Ethermint(_)))
        {
            return Err(Error::InvalidTx(format!(
                "an ethermint message must be the only message, got {} messages",
                tx.msgs.len()
            )))
        }
        // ethermint messages run within the fee gas
        for msg in &tx.msgs {
            if let StdMsg::Ethermint(m) = msg {
                if m.gas_limit > tx.fee.gas {
                    return Err(Error::InvalidTx(format!(
                        "ethermint message gas limit {} exceeds fee gas {}",
                        m.gas_limit, tx.fee.gas
                    )))
                }
            }
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct MempoolFee;

impl AnteDecorator<StdTx> for MempoolFee {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        if ctx.is_check_tx() && !simulate && !ctx.min_gas_prices().is_empty() {
            let gas = Wei::from(tx.fee.gas);
            let mut required = Vec::new();
            for price in ctx.min_gas_prices() {
                let amount = price
                    .amount
                    .checked_mul(&gas)
                    .ok_or_else(|| Error::InvalidTx("fee overflow".into()))?;
                required.push(Coin::new(&price.denom, amount));
            }
            let required = Coins::new(required);
            if !tx.fee.amount.is_any_gte(&required) {
                debug!("rejected std tx: fee {} below {}", tx.fee.amount, required);
                return Err(Error::InsufficientFee(format!(
                    "got: {} required: {}",
                    tx.fee.amount, required
                )))
            }
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct ValidateBasic;

impl AnteDecorator<StdTx> for ValidateBasic {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        if !ctx.is_recheck_tx() {
            tx.validate_basic()?
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct ValidateMemo {
    ak: Arc<dyn AccountKeeper>,
}

impl ValidateMemo {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for ValidateMemo {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let max = self.ak.params(ctx.store()).max_memo_characters;
        let len = tx.memo.chars().count();
        if len as u64 > max {
            return Err(Error::MemoTooLarge { len, max })
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct ConsumeTxSizeGas {
    ak: Arc<dyn AccountKeeper>,
}

impl ConsumeTxSizeGas {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for ConsumeTxSizeGas {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let per_byte = self.ak.params(ctx.store()).tx_size_cost_per_byte;
        let cost = per_byte.saturating_mul(tx.size() as u64);
        ctx.gas_meter_mut().consume_gas(cost, "txSize")?;
        next.run(ctx, tx, simulate)
    }
}

/// Binds the public keys carried by the signatures to their accounts.
pub struct SetPubKey {
    ak: Arc<dyn AccountKeeper>,
}

impl SetPubKey {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for SetPubKey {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let store = ctx.store().clone();
        for (signer, sig) in tx.signers().iter().zip(tx.signatures.iter()) {
            if sig.pub_key.is_empty() {
                continue
            }
            match compressed_pubkey_address(&sig.pub_key) {
                Some(addr) if &addr == signer => (),
                Some(addr) => {
                    return Err(Error::InvalidPubKey(format!(
                        "pubkey does not match signer address {} (got {})",
                        signer, addr
                    )))
                }
                None => {
                    return Err(Error::InvalidPubKey(
                        "malformed secp256k1 public key".into(),
                    ))
                }
            }
            let mut acc = signer_account(self.ak.as_ref(), &store, signer)?;
            if acc.pub_key().is_none() {
                acc.pub_key = sig.pub_key.clone();
                self.ak.set_account(&store, &acc);
            }
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct ValidateSigCount {
    ak: Arc<dyn AccountKeeper>,
}

impl ValidateSigCount {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for ValidateSigCount {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let max = self.ak.params(ctx.store()).tx_sig_limit;
        let got = tx.signatures.len() as u64;
        if got > max {
            return Err(Error::TooManySignatures { got, max })
        }
        next.run(ctx, tx, simulate)
    }
}

/// The first signer pays the declared fee.
pub struct DeductFee {
    ak: Arc<dyn AccountKeeper>,
    bank: Arc<dyn BankKeeper>,
}

impl DeductFee {
    pub fn new(ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>) -> Self {
        Self { ak, bank }
    }
}

impl AnteDecorator<StdTx> for DeductFee {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let payer = tx.fee_payer().ok_or(Error::MissingSender)?;
        let store = ctx.store().clone();
        signer_account(self.ak.as_ref(), &store, &payer)?;
        if !tx.fee.amount.is_zero() {
            self.bank.deduct_fees(&store, &payer, &tx.fee.amount)?;
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct SigGasConsume {
    ak: Arc<dyn AccountKeeper>,
}

impl SigGasConsume {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for SigGasConsume {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let store = ctx.store().clone();
        let cost = self.ak.params(&store).sig_verify_cost_secp256k1;
        for (signer, sig) in tx.signers().iter().zip(tx.signatures.iter()) {
            let acc = signer_account(self.ak.as_ref(), &store, signer)?;
            signing_key(&acc, &sig.pub_key)?;
            ctx.gas_meter_mut()
                .consume_gas(cost, "ante verify: secp256k1")?;
        }
        next.run(ctx, tx, simulate)
    }
}

/// Checks every signature over the sign document of its signer. Skipped
/// when re-admitting and when simulating.
pub struct SigVerification {
    ak: Arc<dyn AccountKeeper>,
}

impl SigVerification {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for SigVerification {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        if ctx.is_recheck_tx() || simulate {
            return next.run(ctx, tx, simulate)
        }
        let store = ctx.store().clone();
        let genesis = ctx.block_height() == 0;
        for (signer, sig) in tx.signers().iter().zip(tx.signatures.iter()) {
            let acc = signer_account(self.ak.as_ref(), &store, signer)?;
            let pub_key = signing_key(&acc, &sig.pub_key)?;
            let account_number = if genesis { 0 } else { acc.account_number };
            let msg = tx.sign_bytes(ctx.chain_id(), account_number, acc.sequence);
            if !verify_secp256k1(&pub_key, &msg, &sig.signature) {
                debug!("bad signature of {} on std tx", signer);
                return Err(Error::Unauthorized(
                    "signature verification failed; verify correct account sequence and chain-id"
                        .into(),
                ))
            }
        }
        next.run(ctx, tx, simulate)
    }
}

pub struct IncrementSequence {
    ak: Arc<dyn AccountKeeper>,
}

impl IncrementSequence {
    pub fn new(ak: Arc<dyn AccountKeeper>) -> Self {
        Self { ak }
    }
}

impl AnteDecorator<StdTx> for IncrementSequence {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut StdTx, simulate: bool,
        next: Next<'_, StdTx>,
    ) -> Result<()> {
        let store = ctx.store().clone();
        for signer in tx.signers().iter() {
            let mut acc = signer_account(self.ak.as_ref(), &store, signer)?;
            acc.sequence += 1;
            self.ak.set_account(&store, &acc);
        }
        next.run(ctx, tx, simulate)
    }
}

pub fn std_ante_chain(
    ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>,
) -> AnteChain<StdTx> {
    chain(vec![
        Box::new(SetUpContext),
        Box::new(ValidateMsg),
        Box::new(MempoolFee),
        Box::new(ValidateBasic),
        Box::new(ValidateMemo::new(ak.clone())),
        Box::new(ConsumeTxSizeGas::new(ak.clone())),
        Box::new(SetPubKey::new(ak.clone())),
        Box::new(ValidateSigCount::new(ak.clone())),
        Box::new(DeductFee::new(ak.clone(), bank)),
        Box::new(SigGasConsume::new(ak.clone())),
        Box::new(SigVerification::new(ak.clone())),
        Box::new(IncrementSequence::new(ak)),
    ])
}
