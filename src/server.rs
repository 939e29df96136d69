//! Bank lifecycle: start the desk pool and dispatcher, and shut them down.
//!
//! `Bank::start` loads the ledger, opens the journal, binds every endpoint
//! and spawns one thread per desk plus the dispatcher thread. `shutdown`
//! stops the dispatcher, sends the administrative close to every desk,
//! joins them and flushes the ledger one last time.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::desk::Desk;
use crate::dispatcher::{Dispatcher, LoadBoard};
use crate::error::ServerError;
use crate::framing::{write_flag, SessionKind};
use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::shutdown::ShutdownSignal;

/// Listen backlog for every endpoint.
const BACKLOG: i32 = 128;

/// A running bank.
pub struct Bank {
    public_addr: SocketAddr,
    desk_addrs: Vec<SocketAddr>,
    open: Arc<AtomicBool>,
    board: Arc<LoadBoard>,
    ledger: Arc<Ledger>,
    journal: Arc<Journal>,
    dispatcher: JoinHandle<()>,
    desks: Vec<JoinHandle<()>>,
}

impl Bank {
    /// Bring the bank up.
    pub fn start(config: &Config) -> Result<Self, ServerError> {
        let journal = Journal::create(&config.journal_path).map_err(|source| ServerError::Journal {
            path: config.journal_path.clone(),
            source,
        })?;
        let journal = Arc::new(journal);
        journal.record("Bank is open");

        let ledger = Ledger::open(&config.ledger_path)?;
        journal.record("Accounts have been initialized");

        let board = Arc::new(LoadBoard::new(config.desks));
        let open = Arc::new(AtomicBool::new(true));

        let mut desk_addrs = Vec::with_capacity(config.desks);
        let mut desks = Vec::with_capacity(config.desks);

        for index in 0..config.desks {
            let listener = bind(config.desk_addr(index), "desk")?;
            let desk = Desk::new(
                index,
                listener,
                Arc::clone(&ledger),
                Arc::clone(&board),
                Arc::clone(&journal),
            );
            desk_addrs.push(desk.local_addr()?);

            let name = format!("desk-{index}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || desk.run())
                .map_err(|source| ServerError::Spawn { name, source })?;
            desks.push(handle);

            journal.record(&format!("Desk {index} is now open"));
        }

        let listener = bind(config.listen, "dispatcher")?;
        let public_addr = listener.local_addr()?;
        let dispatcher = Dispatcher::new(
            listener,
            desk_addrs.clone(),
            Arc::clone(&board),
            Arc::clone(&open),
            Arc::clone(&journal),
        );
        let dispatcher = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|source| ServerError::Spawn {
                name: "dispatcher".to_string(),
                source,
            })?;

        info!(
            addr = %public_addr,
            desks = desk_addrs.len(),
            ledger = %config.ledger_path.display(),
            "Bank open"
        );

        Ok(Self {
            public_addr,
            desk_addrs,
            open,
            board,
            ledger,
            journal,
            dispatcher,
            desks,
        })
    }

    /// Address clients connect to first.
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    /// Address of every desk, by index.
    pub fn desk_addrs(&self) -> &[SocketAddr] {
        &self.desk_addrs
    }

    /// Current pending-session count of every desk.
    pub fn loads(&self) -> Vec<usize> {
        self.board.snapshot()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Block until `signal` fires, then shut down.
    pub fn serve_until(self, signal: &dyn ShutdownSignal) -> Result<(), ServerError> {
        signal.wait()?;
        self.shutdown()
    }

    /// Stop taking new sessions and wind everything down.
    ///
    /// Sessions already in progress run to completion; this returns once
    /// every desk has exited.
    pub fn shutdown(self) -> Result<(), ServerError> {
        info!("Shutting down");
        self.open.store(false, Ordering::SeqCst);

        // The dispatcher only looks at the flag after accept returns.
        if let Err(e) = TcpStream::connect(self.public_addr) {
            warn!(error = %e, "Failed to wake dispatcher");
        }
        if self.dispatcher.join().is_err() {
            error!("Dispatcher thread panicked");
        }

        let mut closers = Vec::with_capacity(self.desk_addrs.len());
        for (index, addr) in self.desk_addrs.iter().enumerate() {
            match send_close(*addr) {
                Ok(stream) => closers.push(stream),
                Err(e) => warn!(desk = index, error = %e, "Failed to signal desk"),
            }
        }

        for (index, handle) in self.desks.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(desk = index, "Desk thread panicked");
            }
        }
        drop(closers);
        self.journal.record("All desks have been closed");

        self.ledger.persist()?;
        self.journal.record("Bank has been closed");
        info!("Bank closed");
        Ok(())
    }
}

/// Open an administrative-close session with a desk.
///
/// The stream is kept open until the desk has been joined.
fn send_close(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;
    write_flag(&mut stream, SessionKind::Close)?;
    Ok(stream)
}

/// Bind a blocking listener with `SO_REUSEADDR`.
fn bind(addr: SocketAddr, what: &str) -> Result<TcpListener, ServerError> {
    let bind_error = |source: std::io::Error| ServerError::Bind {
        what: what.to_string(),
        addr: addr.to_string(),
        source,
    };

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(bind_error)?;

    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(BACKLOG).map_err(bind_error)?;

    Ok(socket.into())
}
