//! Bank desk text protocol parser and response generator.
//!
//! One command per line, fields separated by a single space:
//! - Balance: `l <acc>`
//! - Withdraw: `w <acc> <amt>`
//! - Deposit: `d <acc> <amt>`
//! - Transfer: `t <from> <to> <amt>`
//! - Quit: `q`
//!
//! Every reply is a single line starting with `ok:` or `fail:`.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str;

use crate::error::TransactionError;
use crate::ledger::{AccountId, Balance};

/// Greeting sent by a desk once it starts serving a client.
pub const READY: &str = "ready";

/// Parsed desk command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read an account's balance
    Balance { account: AccountId },

    /// Take money out of an account
    Withdraw { account: AccountId, amount: Balance },

    /// Put money into an account
    Deposit { account: AccountId, amount: Balance },

    /// Move money between two accounts
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Balance,
    },

    /// End the session
    Quit,
}

/// Protocol parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The line does not start with a known command letter
    UnknownCommand,
    /// Known command letter, but the fields do not match its grammar
    Malformed,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownCommand => write!(f, "unknown command"),
            ParseError::Malformed => write!(f, "malformed command"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a single command line.
///
/// `line` must not include the line terminator. The grammar is strict:
/// exact field count, one space between fields, decimal integers, and
/// non-negative amounts.
pub fn parse(line: &[u8]) -> Result<Command, ParseError> {
    let Some((&letter, rest)) = line.split_first() else {
        return Err(ParseError::UnknownCommand);
    };

    match letter {
        b'q' if rest.is_empty() => Ok(Command::Quit),
        b'q' => Err(ParseError::Malformed),
        b'l' => {
            let [account] = fields::<1>(rest)?;
            Ok(Command::Balance {
                account: parse_account(account)?,
            })
        }
        b'w' => {
            let [account, amount] = fields::<2>(rest)?;
            Ok(Command::Withdraw {
                account: parse_account(account)?,
                amount: parse_amount(amount)?,
            })
        }
        b'd' => {
            let [account, amount] = fields::<2>(rest)?;
            Ok(Command::Deposit {
                account: parse_account(account)?,
                amount: parse_amount(amount)?,
            })
        }
        b't' => {
            let [from, to, amount] = fields::<3>(rest)?;
            Ok(Command::Transfer {
                from: parse_account(from)?,
                to: parse_account(to)?,
                amount: parse_amount(amount)?,
            })
        }
        _ => Err(ParseError::UnknownCommand),
    }
}

/// Split `" a b c"` into exactly `N` non-empty fields.
fn fields<const N: usize>(rest: &[u8]) -> Result<[&str; N], ParseError> {
    let rest = rest.strip_prefix(b" ").ok_or(ParseError::Malformed)?;
    let rest = str::from_utf8(rest).map_err(|_| ParseError::Malformed)?;

    let mut out = [""; N];
    let mut parts = rest.split(' ');
    for slot in out.iter_mut() {
        match parts.next() {
            Some(part) if !part.is_empty() => *slot = part,
            _ => return Err(ParseError::Malformed),
        }
    }

    if parts.next().is_some() {
        return Err(ParseError::Malformed);
    }
    Ok(out)
}

fn parse_account(field: &str) -> Result<AccountId, ParseError> {
    field.parse().map_err(|_| ParseError::Malformed)
}

fn parse_amount(field: &str) -> Result<Balance, ParseError> {
    match field.parse::<Balance>() {
        Ok(amount) if amount >= 0 => Ok(amount),
        _ => Err(ParseError::Malformed),
    }
}

/// A reply line, rendered without its terminator by `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Balance {
        account: AccountId,
        balance: Balance,
    },
    Withdrew {
        account: AccountId,
        amount: Balance,
    },
    Deposited {
        account: AccountId,
        amount: Balance,
    },
    Transferred {
        from: AccountId,
        to: AccountId,
        amount: Balance,
    },
    Quit,
    NotEnoughMoney {
        account: AccountId,
    },
    BalanceLimit {
        account: AccountId,
    },
    InvalidCommand,
    CommandError,
}

impl Response {
    /// True for `ok:` replies.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            Response::Balance { .. }
                | Response::Withdrew { .. }
                | Response::Deposited { .. }
                | Response::Transferred { .. }
                | Response::Quit
        )
    }

    /// Encode as a newline-terminated line.
    pub fn encode(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Balance { account, balance } => {
                write!(f, "ok: Balance of account {account}: {balance}")
            }
            Response::Withdrew { account, amount } => {
                write!(f, "ok: Withdrew {amount} from account {account}")
            }
            Response::Deposited { account, amount } => {
                write!(f, "ok: Deposited {amount} to account {account}")
            }
            Response::Transferred { from, to, amount } => {
                write!(
                    f,
                    "ok: Transferred {amount} from account {from} to account {to}"
                )
            }
            Response::Quit => write!(f, "ok: Quit the desk"),
            Response::NotEnoughMoney { account } => {
                write!(f, "fail: Not enough money on account {account}")
            }
            Response::BalanceLimit { account } => {
                write!(f, "fail: Balance limit exceeded on account {account}")
            }
            Response::InvalidCommand => write!(f, "fail: Invalid command"),
            Response::CommandError => write!(f, "fail: Error in command"),
        }
    }
}

impl From<ParseError> for Response {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::UnknownCommand => Response::InvalidCommand,
            ParseError::Malformed => Response::CommandError,
        }
    }
}

impl From<TransactionError> for Response {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::InsufficientFunds { account } => {
                Response::NotEnoughMoney { account }
            }
            TransactionError::BalanceOverflow { account } => Response::BalanceLimit { account },
        }
    }
}
