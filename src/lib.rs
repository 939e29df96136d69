//! threadbank: a multi-desk bank transaction server
//!
//! A fixed pool of desks each own a listening endpoint and serve one client
//! session at a time. A dispatcher owns the public endpoint and hands every
//! new client the address of the least-loaded desk. All desks share one
//! ledger of accounts, each guarded by its own reader/writer lock.
//!
//! Features:
//! - Balance, withdraw, deposit and transfer over a line-based text protocol
//! - Deadlock-free two-account transfers
//! - Ledger persisted to a flat text file after every transaction
//! - Append-only transaction journal
//! - Graceful shutdown on SIGINT/SIGTERM that lets running sessions finish

pub mod client;
pub mod config;
pub mod desk;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod journal;
pub mod ledger;
pub mod protocol;
pub mod server;
pub mod shutdown;

pub use client::BankClient;
pub use config::Config;
pub use error::{LedgerError, ServerError, TransactionError};
pub use ledger::Ledger;
pub use server::Bank;
