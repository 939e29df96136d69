//! In-memory account ledger with per-account locking.
//!
//! Provides a thread-safe table of accounts with:
//! - Lazy creation of accounts on first reference
//! - One reader/writer lock per account balance
//! - Two-account transfers that lock in ascending id order
//! - Full-ledger persistence after every transaction

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{debug, info, trace, warn};

use crate::error::{LedgerError, TransactionError};

/// Account number as it appears on the wire and in the ledger file.
pub type AccountId = i64;

/// Account balance. Never negative.
pub type Balance = i64;

/// A single bank account.
///
/// The balance is only reachable through its lock.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    balance: RwLock<Balance>,
}

impl Account {
    fn new(id: AccountId, balance: Balance) -> Self {
        Self {
            id,
            balance: RwLock::new(balance),
        }
    }

    /// The account number.
    pub fn id(&self) -> AccountId {
        self.id
    }

    /// Read the balance under a read lock.
    pub fn balance(&self) -> Balance {
        *read(&self.balance)
    }
}

/// Where the ledger is persisted.
#[derive(Debug)]
struct LedgerFile {
    path: PathBuf,
    /// Serializes snapshot-and-write so an older snapshot never lands last.
    write_lock: Mutex<()>,
}

/// Thread-safe account table shared by every desk.
#[derive(Debug)]
pub struct Ledger {
    /// Structural lock: held only for lookup-or-create, never across a
    /// balance lock.
    accounts: Mutex<HashMap<AccountId, Arc<Account>>>,
    /// `None` keeps the ledger in memory only.
    file: Option<LedgerFile>,
}

impl Ledger {
    /// Open the ledger backed by `path`, loading any accounts already there.
    ///
    /// A missing file yields an empty ledger. A line that is not
    /// `<id> - <balance>` is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>, LedgerError> {
        let path = path.into();
        let accounts = load(&path)?;

        info!(
            path = %path.display(),
            accounts = accounts.len(),
            "Initializing ledger"
        );

        Ok(Arc::new(Self {
            accounts: Mutex::new(accounts),
            file: Some(LedgerFile {
                path,
                write_lock: Mutex::new(()),
            }),
        }))
    }

    /// Create a ledger that is never written to disk.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(HashMap::new()),
            file: None,
        })
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        lock(&self.accounts).len()
    }

    /// Check if the ledger holds no accounts.
    pub fn is_empty(&self) -> bool {
        lock(&self.accounts).is_empty()
    }

    /// Return the account for `id`, creating it with balance 0 if absent.
    ///
    /// Concurrent callers racing on the same new id all receive the same
    /// account. Creation persists the ledger.
    pub fn ensure(&self, id: AccountId) -> Arc<Account> {
        let (account, created) = {
            let mut accounts = lock(&self.accounts);
            match accounts.entry(id) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let account = entry.insert(Arc::new(Account::new(id, 0)));
                    (Arc::clone(account), true)
                }
            }
        };

        if created {
            debug!(account = id, "Account created");
            self.persist_or_warn();
        }

        account
    }

    /// Look up an account without creating it.
    pub fn get(&self, id: AccountId) -> Option<Arc<Account>> {
        lock(&self.accounts).get(&id).cloned()
    }

    /// Read the balance of `id`, creating the account if needed.
    pub fn read_balance(&self, id: AccountId) -> Balance {
        self.ensure(id).balance()
    }

    /// Add `delta` to the balance of `id` under its write lock.
    ///
    /// A negative delta that would take the balance below zero fails with
    /// `InsufficientFunds` and leaves the balance untouched. The ledger is
    /// persisted whether or not the change was applied.
    pub fn apply_delta(&self, id: AccountId, delta: Balance) -> Result<Balance, TransactionError> {
        let account = self.ensure(id);

        let result = {
            let mut balance = write(&account.balance);
            match balance.checked_add(delta) {
                Some(next) if next >= 0 => {
                    *balance = next;
                    Ok(next)
                }
                None if delta > 0 => Err(TransactionError::BalanceOverflow { account: id }),
                _ => Err(TransactionError::InsufficientFunds { account: id }),
            }
        };

        trace!(account = id, delta, ok = result.is_ok(), "Applied delta");
        self.persist_or_warn();
        result
    }

    /// Deposit a non-negative `amount`.
    pub fn deposit(&self, id: AccountId, amount: Balance) -> Result<Balance, TransactionError> {
        debug_assert!(amount >= 0, "deposit amount must be non-negative");
        self.apply_delta(id, amount)
    }

    /// Withdraw a non-negative `amount`.
    pub fn withdraw(&self, id: AccountId, amount: Balance) -> Result<Balance, TransactionError> {
        debug_assert!(amount >= 0, "withdrawal amount must be non-negative");
        self.apply_delta(id, -amount)
    }

    /// Move `amount` from `from` to `to` atomically with respect to every
    /// other locker of either account.
    ///
    /// When `from == to` the single lock is taken once and the balance is
    /// left as is. Otherwise both write locks are held for the whole
    /// check-and-move, acquired in ascending id order.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Balance,
    ) -> Result<(), TransactionError> {
        debug_assert!(amount >= 0, "transfer amount must be non-negative");
        let source = self.ensure(from);
        let target = self.ensure(to);

        let result = if from == to {
            let balance = write(&source.balance);
            if *balance < amount {
                Err(TransactionError::InsufficientFunds { account: from })
            } else {
                Ok(())
            }
        } else {
            let (mut debit, mut credit) = lock_pair(&source, &target);
            if *debit < amount {
                Err(TransactionError::InsufficientFunds { account: from })
            } else {
                match credit.checked_add(amount) {
                    Some(next) => {
                        *debit -= amount;
                        *credit = next;
                        Ok(())
                    }
                    None => Err(TransactionError::BalanceOverflow { account: to }),
                }
            }
        };

        trace!(from, to, amount, ok = result.is_ok(), "Transfer");
        self.persist_or_warn();
        result
    }

    /// Consistent per-account snapshot, sorted by account id.
    ///
    /// Each balance is read under its own read lock.
    pub fn snapshot(&self) -> Vec<(AccountId, Balance)> {
        let accounts: Vec<Arc<Account>> = lock(&self.accounts).values().cloned().collect();

        let mut pairs: Vec<(AccountId, Balance)> =
            accounts.iter().map(|a| (a.id, a.balance())).collect();
        pairs.sort_unstable_by_key(|&(id, _)| id);
        pairs
    }

    /// Sum of every balance.
    pub fn total(&self) -> i128 {
        self.snapshot().iter().map(|&(_, b)| b as i128).sum()
    }

    /// Overwrite the backing file with the current ledger.
    ///
    /// No account lock is held while the file is written.
    pub fn persist(&self) -> Result<(), LedgerError> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let _guard = lock(&file.write_lock);
        let contents = render(&self.snapshot());
        fs::write(&file.path, contents).map_err(|source| LedgerError::Io {
            path: file.path.clone(),
            source,
        })
    }

    fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist ledger");
        }
    }
}

/// Write-lock two distinct accounts in ascending id order.
///
/// Returns the guards as `(from, to)` regardless of acquisition order.
fn lock_pair<'a>(
    from: &'a Account,
    to: &'a Account,
) -> (RwLockWriteGuard<'a, Balance>, RwLockWriteGuard<'a, Balance>) {
    debug_assert_ne!(from.id, to.id, "lock_pair needs distinct accounts");
    if from.id < to.id {
        let debit = write(&from.balance);
        let credit = write(&to.balance);
        (debit, credit)
    } else {
        let credit = write(&to.balance);
        let debit = write(&from.balance);
        (debit, credit)
    }
}

/// Render the ledger file contents.
fn render(pairs: &[(AccountId, Balance)]) -> String {
    let mut out = String::with_capacity(pairs.len() * 16);
    for (id, balance) in pairs {
        let _ = writeln!(out, "{id} - {balance}");
    }
    out
}

/// Parse one `<id> - <balance>` line.
fn parse_line(line: &str) -> Option<(AccountId, Balance)> {
    let (id, balance) = line.split_once(" - ")?;
    let id = id.parse().ok()?;
    let balance: Balance = balance.parse().ok()?;
    (balance >= 0).then_some((id, balance))
}

fn load(path: &Path) -> Result<HashMap<AccountId, Arc<Account>>, LedgerError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut accounts = HashMap::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let malformed = || LedgerError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            content: line.to_string(),
        };

        let (id, balance) = parse_line(line).ok_or_else(malformed)?;
        if accounts
            .insert(id, Arc::new(Account::new(id, balance)))
            .is_some()
        {
            return Err(malformed());
        }
    }

    Ok(accounts)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
