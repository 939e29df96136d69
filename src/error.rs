//! Error types shared across the bank.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::ledger::AccountId;

/// Failures loading or writing the ledger file.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file could not be read or written.
    #[error("ledger file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line in the ledger file is not of the form `<id> - <balance>`.
    #[error("malformed ledger line {line} in '{}': {content:?}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Business-rule failures of a single transaction.
///
/// These never abort a session; they are reported to the client as a
/// `fail:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("not enough money on account {account}")]
    InsufficientFunds { account: AccountId },

    #[error("balance limit exceeded on account {account}")]
    BalanceOverflow { account: AccountId },
}

/// Errors raised while starting, running or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("journal file '{}': {source}", .path.display())]
    Journal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Shutdown(#[from] crate::shutdown::ShutdownError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
