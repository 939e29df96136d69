//! Append-only transaction journal.
//!
//! Every notable event (desks opening and closing, each response sent to a
//! client) is appended as one timestamped text line. Writing is best-effort:
//! a failed append is reported through `tracing` and otherwise ignored so
//! serving never stalls on the journal.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Shared handle to the journal file.
#[derive(Debug)]
pub struct Journal {
    sink: Option<Sink>,
}

#[derive(Debug)]
struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    /// Create (or truncate) the journal at `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        File::create(&path)?;
        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            sink: Some(Sink {
                path,
                file: Mutex::new(file),
            }),
        })
    }

    /// A journal that drops every record.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Path of the journal file, if enabled.
    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }

    /// Append one event. Trailing newlines in `event` are normalised.
    pub fn record(&self, event: &str) {
        let Some(sink) = &self.sink else {
            return;
        };

        let line = format!(
            "[{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            event.trim_end_matches('\n')
        );

        let mut file = sink.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(path = %sink.path.display(), error = %e, "Failed to append to journal");
        }
    }
}
