//! # evmhost: an EVM execution layer for a foreign consensus engine
//!
//! - evmhost lets an Ethereum-style virtual machine run deterministically on top of a consensus
//!   engine that knows nothing about Ethereum. The engine orders transactions into blocks; this
//!   crate admits them, executes them and produces the logs, the block bloom, the gas
//!   accounting and the state commitment every validator must reproduce bit for bit.
//!
//! - The interpreter itself is not part of the crate. Anything implementing [evm::Evm] can be
//!   plugged in; it sees the world state only through [evm::StateDb].
//!
//! # Overview
//! The crate is a handful of layers that are useful on their own:
//!
//! - [ante]: the admission pipeline. An ordered chain of decorators checks a transaction
//!   cheaply (fees, signatures, nonces, balances), charges the fee and installs the gas meter
//!   before anything is executed.
//! - [state]: the state object cache ([state::CommitStateDb]). It buffers account, code and
//!   storage changes during execution, journals every mutation so that nested calls can
//!   revert, and flushes to the store when a transaction finishes.
//! - [state_transition]: turns one validated transaction into one call or creation on the
//!   interpreter and turns the outcome into gas, logs and events.
//! - [keeper]: maps everything block-level onto the key/value store (block hash history, blooms,
//!   logs, governance parameters) and owns the per-block [keeper::BlockSession].
//! - [processor]: drives all of the above in the order the consensus engine calls it:
//!   begin block, check/deliver transactions, end block, commit.
//! - [querier] and [genesis]: read-only access to committed state and chain bootstrap.
//!
//! A node needs only a few steps:
//!
//! - Build a [processor::BlockProcessor] from a [config::Config], the account and bank keepers
//!   ([auth::StoreAccountKeeper], [auth::StoreBankKeeper]) and an interpreter.
//! - Call [processor::BlockProcessor::init_chain] once with the genesis state.
//! - For every block, call `begin_block`, `deliver_tx` for each transaction, `end_block` and
//!   `commit`; between blocks feed new transactions through `check_tx`.
//!
//! # On the Data Flow
//! Every transaction goes through the same read-modify-write loop:
//!
//! ```notrust
//!   bytes --decode--> [Tx] --ante--> (fee charged, nonce bumped)
//!                                          |
//!                                   [StateTransition]
//!                                          |
//!                                    <Evm> create/call
//!                                          |
//!                                    <StateDb> reads and writes
//!                                          v
//!                                  [CommitStateDb] -- journal --> revert on failure
//!                                          |
//!                                    finalize(): flush
//!                                          v
//!       [exec branch] --write--> [deliver branch] --commit--> [MemStore root] --> app hash
//! ```
//!
//! Writes never go straight to the committed root. Each layer below the root is a write
//! buffer ([store::CacheStore]) that is either flushed into its parent or dropped, which is how
//! a failed execution keeps the fee it paid but loses everything else it did.

#[macro_use]
pub mod common;
pub mod ante;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod evm;
pub mod gas;
pub mod genesis;
pub mod handler;
pub mod keeper;
pub mod params;
pub mod processor;
pub mod querier;
pub mod state;
pub mod state_transition;
pub mod store;
pub mod tx;

pub use error::{Error, ErrorKind, Result};
