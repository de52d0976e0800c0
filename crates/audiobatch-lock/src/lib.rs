//! Exclusive leases on the shared pipeline state document
//!
//! Every writer of the state document (the orchestrator, the batch scheduler, and any phase
//! executable following the same discipline) takes an advisory `fd-lock` write lock on a sidecar
//! file next to the document before it loads, mutates and replaces it. The lease is scoped to a
//! closure so it is released on every exit path, including early returns and panics.
//!
//! The lock is advisory and coordinates cooperating processes only; it is not a security
//! boundary. The sidecar file is never removed, because unlinking a `flock`-style lock file
//! while another process waits on it would let two holders in at once.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

/// Default time to wait for a contended lease before giving up
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Diagnostic record written into the sidecar while a lease is held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Process ID of the holder
    pub pid: u32,
    /// When the lease was acquired
    pub acquired_at: DateTime<Utc>,
    /// Free-form holder description (e.g. `orchestrator:book_01`)
    pub holder: String,
}

/// Lock errors for lease acquisition
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(
        "Timed out after {waited_ms}ms waiting for lock {path}{}",
        holder.as_ref().map(|h| format!(" (held by {h})")).unwrap_or_default()
    )]
    Timeout {
        path: String,
        waited_ms: u64,
        holder: Option<String>,
    },

    #[error("Failed to acquire lock {path}: {reason}")]
    AcquisitionFailed { path: String, reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

/// Sidecar lock path for a guarded file: `<file>.lock`
#[must_use]
pub fn lock_path_for(target: &Utf8Path) -> Utf8PathBuf {
    let mut name = target.file_name().unwrap_or("state").to_string();
    name.push_str(".lock");
    match target.parent() {
        Some(parent) => parent.join(name),
        None => Utf8PathBuf::from(name),
    }
}

/// Exclusive lease on one guarded file
#[derive(Debug, Clone)]
pub struct StateLock {
    lock_path: Utf8PathBuf,
    wait: Duration,
    holder: String,
}

impl StateLock {
    /// Lease guarding `target`, waiting up to [`DEFAULT_LOCK_WAIT`]
    #[must_use]
    pub fn new(target: &Utf8Path) -> Self {
        Self {
            lock_path: lock_path_for(target),
            wait: DEFAULT_LOCK_WAIT,
            holder: format!("pid:{}", process::id()),
        }
    }

    /// Override how long acquisition waits under contention
    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Override the holder label recorded in the lease
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    #[must_use]
    pub fn lock_path(&self) -> &Utf8Path {
        &self.lock_path
    }

    #[must_use]
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Run `body` while holding the exclusive lease.
    ///
    /// Acquisition polls `try_write` with capped exponential backoff until the configured
    /// wait elapses, then fails with [`LockError::Timeout`] naming the last recorded holder.
    /// The lease is dropped as soon as `body` returns.
    pub fn with_exclusive<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<LockError>,
    {
        if let Some(parent) = self.lock_path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                E::from(LockError::AcquisitionFailed {
                    path: self.lock_path.to_string(),
                    reason: format!("Failed to create lock directory: {e}"),
                })
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| E::from(LockError::Io(e)))?;
        let mut lock = RwLock::new(file);

        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match lock.try_write() {
                Ok(mut guard) => {
                    let lease = LeaseInfo {
                        pid: process::id(),
                        acquired_at: Utc::now(),
                        holder: self.holder.clone(),
                    };
                    if let Err(e) = record_lease(&mut guard, &lease) {
                        tracing::debug!(path = %self.lock_path, error = %e, "Could not record lease info");
                    }
                    tracing::trace!(path = %self.lock_path, waited_ms = started.elapsed().as_millis() as u64, "Lease acquired");
                    return body();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.wait {
                        return Err(E::from(LockError::Timeout {
                            path: self.lock_path.to_string(),
                            waited_ms: elapsed.as_millis() as u64,
                            holder: self.current_holder().map(|info| {
                                format!("{} pid {} since {}", info.holder, info.pid, info.acquired_at)
                            }),
                        }));
                    }
                    let remaining = self.wait.saturating_sub(elapsed);
                    thread::sleep(backoff.min(remaining));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    return Err(E::from(LockError::AcquisitionFailed {
                        path: self.lock_path.to_string(),
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }

    /// Last lease recorded in the sidecar, if any is readable
    #[must_use]
    pub fn current_holder(&self) -> Option<LeaseInfo> {
        let content = fs::read_to_string(&self.lock_path).ok()?;
        serde_json::from_str(content.trim()).ok()
    }
}

fn record_lease(file: &mut fs::File, lease: &LeaseInfo) -> io::Result<()> {
    let body = serde_json::to_string(lease).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(body.as_bytes())?;
    file.flush()
}

/// Read back a sidecar's lease without taking the lock
pub fn read_lease(lock_path: &Utf8Path) -> io::Result<Option<LeaseInfo>> {
    let mut content = String::new();
    match fs::File::open(lock_path) {
        Ok(mut f) => {
            f.read_to_string(&mut content)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    Ok(serde_json::from_str(content.trim()).ok())
}
