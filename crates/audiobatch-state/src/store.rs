use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::fs;
use std::io;
use std::time::Duration;

use audiobatch_lock::StateLock;
use audiobatch_utils::StateError;
use audiobatch_utils::atomic_write::write_file_atomic;

use crate::document::PipelineState;

enum Loaded {
    Missing,
    Parsed(PipelineState),
    Corrupt(String),
}

/// Sole owner of the on-disk pipeline state document.
///
/// `read` never fails: a missing or corrupt file reads as an empty document (a corrupt one is
/// first moved aside to `<path>.corrupt-<timestamp>`). Every mutation goes through `transact`,
/// which holds the exclusive lease across load, mutate and atomic replace, so concurrent
/// writers (including other processes) never clobber each other's keys.
///
/// The store is synchronous; async callers use [`PipelineStateStore::transact_async`].
#[derive(Debug, Clone)]
pub struct PipelineStateStore {
    path: Utf8PathBuf,
    lock: StateLock,
}

impl PipelineStateStore {
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let lock = StateLock::new(&path);
        Self { path, lock }
    }

    #[must_use]
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock = self.lock.with_wait(wait);
        self
    }

    /// Label recorded in the lease while this store holds it
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.lock = self.lock.with_holder(holder);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Current document, or empty when missing or corrupt.
    ///
    /// Takes no lease on the happy path; atomic replacement makes unlocked reads safe.
    #[must_use]
    pub fn read(&self) -> PipelineState {
        match self.load() {
            Ok(Loaded::Parsed(state)) => state,
            Ok(Loaded::Missing) => PipelineState::new(),
            Ok(Loaded::Corrupt(reason)) => {
                let quarantined = self.lock.with_exclusive(|| -> Result<(), StateError> {
                    // Re-check under the lease; a writer may have replaced it meanwhile
                    match self.load()? {
                        Loaded::Corrupt(_) => self.quarantine(&reason).map(|_| ()),
                        Loaded::Missing | Loaded::Parsed(_) => Ok(()),
                    }
                });
                if let Err(e) = quarantined {
                    tracing::warn!(path = %self.path, error = %e, "Could not quarantine corrupt state document");
                }
                match self.load() {
                    Ok(Loaded::Parsed(state)) => state,
                    _ => PipelineState::new(),
                }
            }
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "State document unreadable; treating as empty");
                PipelineState::new()
            }
        }
    }

    /// Load → mutate → atomically replace, under the exclusive lease.
    ///
    /// Returns the committed document. A write failure after `mutate` ran is surfaced and
    /// leaves the previous document in place.
    pub fn transact<F>(&self, mutate: F) -> Result<PipelineState, StateError>
    where
        F: FnOnce(&mut PipelineState),
    {
        self.lock.with_exclusive(|| {
            let mut state = match self.load()? {
                Loaded::Parsed(state) => state,
                Loaded::Missing => PipelineState::new(),
                Loaded::Corrupt(reason) => {
                    self.quarantine(&reason)?;
                    PipelineState::new()
                }
            };

            mutate(&mut state);

            let body = serde_json::to_string_pretty(&state).map_err(|e| {
                StateError::SerializeFailed {
                    reason: e.to_string(),
                }
            })?;
            write_file_atomic(&self.path, &body).map_err(|e| StateError::WriteFailed {
                path: self.path.to_string(),
                reason: format!("{e:#}"),
            })?;

            Ok(state)
        })
    }

    /// [`transact`](Self::transact) on the blocking pool
    pub async fn transact_async<F>(&self, mutate: F) -> Result<PipelineState, StateError>
    where
        F: FnOnce(&mut PipelineState) + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.transact(mutate))
            .await
            .map_err(|e| StateError::TaskFailed {
                reason: e.to_string(),
            })?
    }

    /// [`read`](Self::read) on the blocking pool
    pub async fn read_async(&self) -> PipelineState {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.read()).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "State read task failed; treating as empty");
                PipelineState::new()
            }
        }
    }

    fn load(&self) -> Result<Loaded, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Ok(Loaded::Corrupt(format!("not UTF-8: {e}")));
            }
            Err(e) => {
                return Err(StateError::ReadFailed {
                    path: self.path.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Loaded::Missing);
        }

        match serde_json::from_str::<PipelineState>(&content) {
            Ok(state) => Ok(Loaded::Parsed(state)),
            Err(e) => Ok(Loaded::Corrupt(e.to_string())),
        }
    }

    /// Move the current file aside; never deletes it
    fn quarantine(&self, reason: &str) -> Result<Utf8PathBuf, StateError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut target = Utf8PathBuf::from(format!("{}.corrupt-{stamp}", self.path));
        let mut n = 1;
        while target.exists() {
            target = Utf8PathBuf::from(format!("{}.corrupt-{stamp}-{n}", self.path));
            n += 1;
        }

        fs::rename(&self.path, &target).map_err(|e| StateError::QuarantineFailed {
            path: self.path.to_string(),
            reason: e.to_string(),
        })?;
        tracing::warn!(
            path = %self.path,
            quarantined = %target,
            reason,
            "State document was corrupt; moved aside and starting empty"
        );
        Ok(target)
    }
}
