//! Admission pipeline.
//!
//! Every transaction passes through an ordered chain of decorators before it is executed (or
//! admitted to the mempool). A decorator inspects or mutates the context and the
//! transaction, then either fails the whole chain or hands control to the rest of it through
//! [Next]. Standard-format and Ethereum-format transactions get separate chains; the
//! [AnteHandler] routes by the [Tx] variant.
//!
//! Gas meters are installed by the first decorator of each chain. Running out of gas anywhere
//! later surfaces as [Error::GasMeter](crate::error::Error::GasMeter) and is converted into
//! the typed out-of-gas error by that same first decorator, on the way back out.
use std::sync::Arc;

use crate::auth::{AccountKeeper, BankKeeper};
use crate::context::Context;
use crate::error::Result;
use crate::keeper::Keeper;
use crate::tx::{EthTx, StdTx, Tx};

pub mod eth;
pub mod std_tx;

pub trait AnteDecorator<T>: Send + Sync {
    fn ante_handle(
        &self, ctx: &mut Context, tx: &mut T, simulate: bool, next: Next<'_, T>,
    ) -> Result<()>;
}

/// The decorators that have not run yet.
pub struct Next<'a, T> {
    rest: &'a [Box<dyn AnteDecorator<T>>],
}

impl<'a, T> Next<'a, T> {
    pub fn run(self, ctx: &mut Context, tx: &mut T, simulate: bool) -> Result<()> {
        match self.rest.split_first() {
            Some((first, rest)) => {
                first.ante_handle(ctx, tx, simulate, Next { rest })
            }
            None => Ok(()),
        }
    }
}

pub struct AnteChain<T> {
    decorators: Vec<Box<dyn AnteDecorator<T>>>,
}

impl<T> AnteChain<T> {
    pub fn handle(&self, ctx: &mut Context, tx: &mut T, simulate: bool) -> Result<()> {
        Next {
            rest: &self.decorators,
        }
        .run(ctx, tx, simulate)
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

/// Compose decorators; they run in the given order.
pub fn chain<T>(decorators: Vec<Box<dyn AnteDecorator<T>>>) -> AnteChain<T> {
    AnteChain { decorators }
}

pub struct AnteHandler {
    eth: AnteChain<EthTx>,
    std: AnteChain<StdTx>,
}

impl AnteHandler {
    pub fn new(
        keeper: Arc<Keeper>, ak: Arc<dyn AccountKeeper>, bank: Arc<dyn BankKeeper>,
    ) -> Self {
        Self {
            eth: eth::eth_ante_chain(keeper, ak.clone(), bank.clone()),
            std: std_tx::std_ante_chain(ak, bank),
        }
    }

    pub fn from_chains(eth: AnteChain<EthTx>, std: AnteChain<StdTx>) -> Self {
        Self { eth, std }
    }

    pub fn handle(&self, ctx: &mut Context, tx: &mut Tx, simulate: bool) -> Result<()> {
        match tx {
            Tx::Eth(tx) => self.eth.handle(ctx, tx, simulate),
            Tx::Std(tx) => self.std.handle(ctx, tx, simulate),
        }
    }
}
