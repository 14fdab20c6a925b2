//! Message routing after admission.
use std::sync::Arc;

use log::debug;

use crate::common::Hash;
use crate::context::{Context, Event};
use crate::error::Result;
use crate::keeper::{BlockSession, Keeper};
use crate::state_transition::{
    TxResult, ATTRIBUTE_KEY_AMOUNT, ATTRIBUTE_KEY_RECIPIENT, ATTRIBUTE_KEY_SENDER,
};
use crate::tx::{StdMsg, StdTx, Tx};

pub const EVENT_TYPE_TRANSFER: &str = "transfer";

pub struct Handler {
    keeper: Arc<Keeper>,
}

impl Handler {
    pub fn new(keeper: Arc<Keeper>) -> Self {
        Self { keeper }
    }

    pub fn handle(
        &self, ctx: &mut Context, session: &mut BlockSession, tx: &mut Tx,
    ) -> Result<TxResult> {
        match tx {
            Tx::Eth(tx) => self
                .keeper
                .ethereum_tx(ctx, session, tx)
                .map(|res| res.result),
            Tx::Std(tx) => self.handle_std(ctx, session, tx),
        }
    }

    /// Run every message in order; the first failure fails the whole
    /// transaction.
    fn handle_std(
        &self, ctx: &mut Context, session: &mut BlockSession, tx: &StdTx,
    ) -> Result<TxResult> {
        let tx_hash = Hash::hash(&tx.encode());
        let mut data = Vec::new();
        let mut logs = Vec::new();
        for msg in tx.msgs.iter() {
            debug!("handling {} message from {}", msg.route(), msg.signer());
            match msg {
                StdMsg::Send(m) => {
                    self.keeper.bank_keeper().send_coins(
                        ctx.store(),
                        &m.from,
                        &m.to,
                        &m.amount,
                    )?;
                    ctx.emit_event(
                        Event::new(EVENT_TYPE_TRANSFER)
                            .attr(ATTRIBUTE_KEY_RECIPIENT, m.to.to_hex())
                            .attr(ATTRIBUTE_KEY_SENDER, m.from.to_hex())
                            .attr(ATTRIBUTE_KEY_AMOUNT, &m.amount),
                    );
                    logs.push(format!("sent {} to {}", m.amount, m.to.to_hex()));
                }
                StdMsg::Ethermint(m) => {
                    let res = self.keeper.ethermint_msg(
                        ctx,
                        session,
                        m,
                        tx_hash.clone(),
                    )?;
                    data.extend_from_slice(&res.result.data);
                    logs.push(res.result.log);
                }
            }
        }
        Ok(TxResult {
            data: data.into(),
            log: logs.join("; "),
        })
    }
}
