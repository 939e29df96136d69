//! Public endpoint that hands each new client to the least-loaded desk.
//!
//! The dispatcher never serves commands itself. For every accepted
//! connection it picks a desk, bumps that desk's load counter, writes the
//! desk's address as one line and closes its side; the client then
//! connects to the desk directly.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::journal::Journal;

/// Pending-session counters, one per desk.
///
/// The dispatcher's scan-and-increment and each desk's decrement share one
/// mutex, so a selection always sees a consistent snapshot.
#[derive(Debug)]
pub struct LoadBoard {
    loads: Mutex<Vec<usize>>,
}

impl LoadBoard {
    /// A board for `desks` idle desks.
    pub fn new(desks: usize) -> Self {
        Self::from_loads(vec![0; desks])
    }

    /// A board starting from the given counters.
    pub fn from_loads(loads: Vec<usize>) -> Self {
        Self {
            loads: Mutex::new(loads),
        }
    }

    /// Number of desks on the board.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the board has no desks.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of every counter.
    pub fn snapshot(&self) -> Vec<usize> {
        self.lock().clone()
    }

    /// Pick the least-loaded desk and count one more session against it.
    ///
    /// Ties go to the lowest index. Returns `None` only for an empty board.
    pub fn assign(&self) -> Option<usize> {
        let mut loads = self.lock();
        let idx = least_loaded(&loads)?;
        loads[idx] += 1;
        Some(idx)
    }

    /// Count one session on desk `idx` as finished.
    pub fn release(&self, idx: usize) {
        let mut loads = self.lock();
        match loads.get_mut(idx) {
            Some(load) if *load > 0 => *load -= 1,
            Some(_) => warn!(desk = idx, "Released a desk with no pending sessions"),
            None => error!(desk = idx, "Released an unknown desk"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<usize>> {
        self.loads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pause after a failed `accept`, unless the failure was confined to the
/// one connection being accepted.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// How long to wait before accepting again after `e`.
pub fn accept_backoff(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

/// Index of the first minimum.
pub fn least_loaded(loads: &[usize]) -> Option<usize> {
    loads
        .iter()
        .enumerate()
        .min_by_key(|&(idx, &load)| (load, idx))
        .map(|(idx, _)| idx)
}

/// Accept loop for the public endpoint.
pub struct Dispatcher {
    listener: TcpListener,
    desks: Vec<SocketAddr>,
    board: Arc<LoadBoard>,
    open: Arc<AtomicBool>,
    journal: Arc<Journal>,
}

impl Dispatcher {
    pub fn new(
        listener: TcpListener,
        desks: Vec<SocketAddr>,
        board: Arc<LoadBoard>,
        open: Arc<AtomicBool>,
        journal: Arc<Journal>,
    ) -> Self {
        debug_assert_eq!(desks.len(), board.len(), "one load counter per desk");
        Self {
            listener,
            desks,
            board,
            open,
            journal,
        }
    }

    /// Hand off connections until the open flag is cleared.
    ///
    /// The flag is checked after every accept, so whoever clears it must
    /// also connect once to wake this loop.
    pub fn run(self) {
        info!(
            addr = ?self.listener.local_addr().ok(),
            desks = self.desks.len(),
            "Dispatcher listening"
        );

        loop {
            let accepted = self.listener.accept();

            if !self.open.load(Ordering::SeqCst) {
                break;
            }

            match accepted {
                Ok((mut stream, peer)) => {
                    trace!(peer = %peer, "New connection");
                    self.hand_off(&mut stream, peer);
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    if let Some(pause) = accept_backoff(&e) {
                        thread::sleep(pause);
                    }
                }
            }
        }

        info!("Dispatcher closed");
        self.journal.record("Main socket has been closed");
    }

    /// Assign a desk and send its address to the client.
    ///
    /// Returns the desk index, or `None` if the write failed and the
    /// assignment was rolled back.
    fn hand_off<W: Write>(&self, stream: &mut W, peer: SocketAddr) -> Option<usize> {
        let Some(idx) = self.board.assign() else {
            error!("No desks to hand off to");
            return None;
        };
        let desk = self.desks[idx];

        match send_address(stream, desk) {
            Ok(()) => {
                debug!(peer = %peer, desk = idx, addr = %desk, "Handed off client");
                Some(idx)
            }
            Err(e) => {
                warn!(peer = %peer, desk = idx, error = %e, "Handoff failed");
                self.board.release(idx);
                None
            }
        }
    }
}

/// Write `addr` as a single line.
fn send_address<W: Write>(stream: &mut W, addr: SocketAddr) -> io::Result<()> {
    stream.write_all(format!("{addr}\n").as_bytes())?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpStream;

    /// Writer whose every write fails, like a client that hung up.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn idle_dispatcher(desks: Vec<SocketAddr>, board: Arc<LoadBoard>) -> Dispatcher {
        Dispatcher::new(
            TcpListener::bind("127.0.0.1:0").unwrap(),
            desks,
            board,
            Arc::new(AtomicBool::new(true)),
            Arc::new(Journal::disabled()),
        )
    }

    #[test]
    fn test_least_loaded_first_minimum() {
        assert_eq!(least_loaded(&[3, 1, 4, 1, 5]), Some(1));
        assert_eq!(least_loaded(&[0, 0, 0]), Some(0));
        assert_eq!(least_loaded(&[2, 2, 1]), Some(2));
        assert_eq!(least_loaded(&[]), None);
    }

    #[test]
    fn test_assign_increments_chosen_desk() {
        let board = LoadBoard::from_loads(vec![3, 1, 4, 1, 5]);
        assert_eq!(board.assign(), Some(1));
        assert_eq!(board.snapshot(), vec![3, 2, 4, 1, 5]);
        assert_eq!(board.assign(), Some(3));
        assert_eq!(board.snapshot(), vec![3, 2, 4, 2, 5]);
    }

    #[test]
    fn test_release_never_below_zero() {
        let board = LoadBoard::new(2);
        board.assign();
        board.release(0);
        board.release(0);
        assert_eq!(board.snapshot(), vec![0, 0]);
    }

    #[test]
    fn test_round_robin_when_idle() {
        let board = LoadBoard::new(3);
        let picks: Vec<_> = (0..6).filter_map(|_| board.assign()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_concurrent_assign_release_balances() {
        let board = Arc::new(LoadBoard::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let board = Arc::clone(&board);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(idx) = board.assign() {
                            board.release(idx);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(board.snapshot(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_dispatcher_hands_off_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let public = listener.local_addr().unwrap();
        let desks: Vec<SocketAddr> = vec![
            "127.0.0.1:4001".parse().unwrap(),
            "127.0.0.1:4002".parse().unwrap(),
        ];
        let board = Arc::new(LoadBoard::from_loads(vec![1, 0]));
        let open = Arc::new(AtomicBool::new(true));

        let dispatcher = Dispatcher::new(
            listener,
            desks,
            Arc::clone(&board),
            Arc::clone(&open),
            Arc::new(Journal::disabled()),
        );
        let handle = thread::spawn(move || dispatcher.run());

        let mut reply = String::new();
        TcpStream::connect(public)
            .unwrap()
            .read_to_string(&mut reply)
            .unwrap();
        assert_eq!(reply, "127.0.0.1:4002\n");
        assert_eq!(board.snapshot(), vec![1, 1]);

        open.store(false, Ordering::SeqCst);
        let _ = TcpStream::connect(public);
        handle.join().unwrap();
        assert_eq!(board.snapshot(), vec![1, 1]);
    }

    #[test]
    fn test_failed_handoff_rolls_back() {
        let desks: Vec<SocketAddr> = vec![
            "127.0.0.1:4001".parse().unwrap(),
            "127.0.0.1:4002".parse().unwrap(),
            "127.0.0.1:4003".parse().unwrap(),
        ];
        let board = Arc::new(LoadBoard::from_loads(vec![2, 1, 3]));
        let dispatcher = idle_dispatcher(desks, Arc::clone(&board));
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        assert_eq!(dispatcher.hand_off(&mut BrokenPipe, peer), None);
        assert_eq!(board.snapshot(), vec![2, 1, 3]);

        let mut out = Vec::new();
        assert_eq!(dispatcher.hand_off(&mut out, peer), Some(1));
        assert_eq!(out, b"127.0.0.1:4002\n");
        assert_eq!(board.snapshot(), vec![2, 2, 3]);
    }

    #[test]
    fn test_accept_backoff() {
        let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, "aborted");
        assert_eq!(accept_backoff(&aborted), None);

        let exhausted = io::Error::new(io::ErrorKind::Other, "too many open files");
        assert_eq!(accept_backoff(&exhausted), Some(ACCEPT_BACKOFF));
    }
}
