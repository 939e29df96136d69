//! A desk: one worker thread serving one client at a time.
//!
//! Each desk owns a listening endpoint. It accepts a connection, reads the
//! session flag, and either serves a full command session or, on the
//! administrative close flag, exits for good.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{accept_backoff, LoadBoard};
use crate::framing::{read_flag, Line, LineBuffer, SessionKind};
use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::protocol::{self, Command, Response, READY};

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `q`.
    Quit,
    /// The client closed the connection without quitting.
    Disconnected,
}

/// One worker in the desk pool.
pub struct Desk {
    index: usize,
    listener: TcpListener,
    ledger: Arc<Ledger>,
    board: Arc<LoadBoard>,
    journal: Arc<Journal>,
}

impl Desk {
    pub fn new(
        index: usize,
        listener: TcpListener,
        ledger: Arc<Ledger>,
        board: Arc<LoadBoard>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            index,
            listener,
            ledger,
            board,
            journal,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve sessions until the administrative close arrives.
    pub fn run(self) {
        info!(desk = self.index, addr = ?self.listener.local_addr().ok(), "Desk open");

        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(desk = self.index, error = %e, "Failed to accept connection");
                    if let Some(pause) = accept_backoff(&e) {
                        thread::sleep(pause);
                    }
                    continue;
                }
            };

            match read_flag(&mut stream) {
                Ok(SessionKind::Close) => break,
                Ok(SessionKind::Client) => {}
                Err(e) => {
                    debug!(desk = self.index, peer = %peer, error = %e, "Connection dropped before flag");
                    continue;
                }
            }

            debug!(desk = self.index, peer = %peer, "Serving client");
            match serve_session(&mut stream, &self.ledger, &self.journal) {
                Ok(end) => trace!(desk = self.index, ?end, "Session finished"),
                Err(e) => debug!(desk = self.index, error = %e, "Session aborted"),
            }
            drop(stream);
            self.board.release(self.index);
        }

        info!(desk = self.index, "Desk exiting");
        self.journal.record(&format!("Desk {} exiting", self.index));
    }
}

/// Serve one client: send the ready line, then answer command lines until
/// `q` or EOF.
///
/// Write failures end the session with an error; nothing else does.
pub fn serve_session(
    stream: &mut TcpStream,
    ledger: &Ledger,
    journal: &Journal,
) -> io::Result<SessionEnd> {
    stream.write_all(format!("{READY}\n").as_bytes())?;

    let mut reader = stream.try_clone()?;
    let mut lines = LineBuffer::new();

    loop {
        let response = match lines.read_line(&mut reader)? {
            None => return Ok(SessionEnd::Disconnected),
            Some(Line::Overlong) => Response::CommandError,
            Some(Line::Complete(line)) => match protocol::parse(&line) {
                Ok(command) => execute(command, ledger),
                Err(e) => {
                    trace!(error = %e, line = %String::from_utf8_lossy(&line), "Rejected command");
                    Response::from(e)
                }
            },
        };

        stream.write_all(&response.encode())?;
        trace!(ok = response.is_ok(), reply = %response, "Replied");
        journal.record(&response.to_string());

        if response == Response::Quit {
            return Ok(SessionEnd::Quit);
        }
    }
}

/// Run one command against the ledger.
pub fn execute(command: Command, ledger: &Ledger) -> Response {
    match command {
        Command::Balance { account } => Response::Balance {
            account,
            balance: ledger.read_balance(account),
        },
        Command::Withdraw { account, amount } => match ledger.withdraw(account, amount) {
            Ok(_) => Response::Withdrew { account, amount },
            Err(e) => e.into(),
        },
        Command::Deposit { account, amount } => match ledger.deposit(account, amount) {
            Ok(_) => Response::Deposited { account, amount },
            Err(e) => e.into(),
        },
        Command::Transfer { from, to, amount } => match ledger.transfer(from, to, amount) {
            Ok(()) => Response::Transferred { from, to, amount },
            Err(e) => e.into(),
        },
        Command::Quit => Response::Quit,
    }
}
