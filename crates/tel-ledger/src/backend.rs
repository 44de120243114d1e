use std::path::{Path, PathBuf};

use serde::Serialize;
use tel_types::ChainScope;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::records::LedgerEntry;
use crate::wal::{WalConfig, WriteAheadLog, SEGMENT_EXTENSION};

/// Per-scope append log. Owned by the scope's writer lock.
pub trait ScopeLog: Send + 'static {
    /// Make `entry` durable. Returns only once the entry would survive a
    /// restart.
    fn persist(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// Durable storage behind a [`ChainStore`](crate::ChainStore).
pub trait StorageBackend: Send + Sync + 'static {
    type Log: ScopeLog;

    /// Open the log for `scope`, creating it if needed. Refuses a log that
    /// does not end on a frame boundary.
    fn open_log(&self, scope: &ChainScope) -> Result<Self::Log, LedgerError>;

    /// Load every persisted chain. Any damage, a torn tail included, fails
    /// with [`LedgerError::ChainIntegrity`] and nothing is modified.
    fn recover(&self) -> Result<Vec<(ChainScope, Vec<LedgerEntry>)>, LedgerError>;

    /// Re-read a scope's persisted entries without repairing anything.
    /// `None` if the backend keeps nothing outside memory.
    fn read_back(&self, scope: &ChainScope) -> Result<Option<Vec<LedgerEntry>>, LedgerError>;
}

/// Backend that keeps nothing beyond the store's own memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryBackend;

#[derive(Debug, Default)]
pub struct MemoryLog;

impl ScopeLog for MemoryLog {
    fn persist(&mut self, _entry: &LedgerEntry) -> Result<(), LedgerError> {
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    type Log = MemoryLog;

    fn open_log(&self, _scope: &ChainScope) -> Result<MemoryLog, LedgerError> {
        Ok(MemoryLog)
    }

    fn recover(&self) -> Result<Vec<(ChainScope, Vec<LedgerEntry>)>, LedgerError> {
        Ok(Vec::new())
    }

    fn read_back(&self, _scope: &ChainScope) -> Result<Option<Vec<LedgerEntry>>, LedgerError> {
        Ok(None)
    }
}

/// A torn tail cut off by [`WalBackend::repair`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepairedSegment {
    pub scope: ChainScope,
    pub entries_kept: usize,
    pub bytes_dropped: u64,
}

/// One write-ahead segment per scope: `<dir>/<hex(scope)>.wal`.
#[derive(Clone, Debug)]
pub struct WalBackend {
    dir: PathBuf,
    config: WalConfig,
}

impl WalBackend {
    pub fn new(dir: impl Into<PathBuf>, config: WalConfig) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, config })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, scope: &ChainScope) -> PathBuf {
        self.dir
            .join(format!("{}.{SEGMENT_EXTENSION}", scope.file_stem()))
    }

    fn segment_scopes(&self) -> Result<Vec<(ChainScope, PathBuf)>, LedgerError> {
        let mut found = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match ChainScope::from_file_stem(stem) {
                Ok(scope) => found.push((scope, path)),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unrecognised segment"),
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Truncate torn tails left by interrupted writes.
    ///
    /// Only a short final write is cut. Checksum failures and other
    /// corruption still fail with [`LedgerError::ChainIntegrity`] and leave
    /// the segment untouched.
    pub fn repair(&self) -> Result<Vec<RepairedSegment>, LedgerError> {
        let mut repaired = Vec::new();
        for (scope, path) in self.segment_scopes()? {
            let segment = WriteAheadLog::read_segment(&path, &scope)?;
            if !segment.has_torn_tail() {
                continue;
            }
            let bytes_dropped = segment.file_len - segment.valid_len;
            warn!(
                scope = %scope,
                valid_len = segment.valid_len,
                bytes_dropped,
                "truncating torn WAL tail"
            );
            WriteAheadLog::truncate_to(&path, segment.valid_len)?;
            repaired.push(RepairedSegment {
                scope,
                entries_kept: segment.entries.len(),
                bytes_dropped,
            });
        }
        Ok(repaired)
    }
}

impl ScopeLog for WriteAheadLog {
    fn persist(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.append(entry).map(|_| ())
    }
}

impl StorageBackend for WalBackend {
    type Log = WriteAheadLog;

    fn open_log(&self, scope: &ChainScope) -> Result<WriteAheadLog, LedgerError> {
        let path = self.segment_path(scope);
        if path.exists() {
            WriteAheadLog::read_segment(&path, scope)?.require_clean(scope)?;
        }
        WriteAheadLog::open(&path, self.config.clone())
    }

    fn recover(&self) -> Result<Vec<(ChainScope, Vec<LedgerEntry>)>, LedgerError> {
        let mut chains = Vec::new();
        for (scope, path) in self.segment_scopes()? {
            let segment = WriteAheadLog::read_segment(&path, &scope)?;
            if let Err(err) = segment.require_clean(&scope) {
                warn!(scope = %scope, error = %err, "refusing to load segment");
                return Err(err);
            }
            if segment.entries.is_empty() {
                continue;
            }
            info!(scope = %scope, entries = segment.entries.len(), "recovered chain");
            chains.push((scope, segment.entries));
        }
        Ok(chains)
    }

    fn read_back(&self, scope: &ChainScope) -> Result<Option<Vec<LedgerEntry>>, LedgerError> {
        let path = self.segment_path(scope);
        if !path.exists() {
            return Ok(Some(Vec::new()));
        }
        let segment = WriteAheadLog::read_segment(&path, scope)?;
        segment.require_clean(scope)?;
        Ok(Some(segment.entries))
    }
}
