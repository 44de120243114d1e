use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tel_types::{payload_from, ChainScope, Digest, Payload};
use tracing::{debug, info, warn};

use crate::backend::{MemoryBackend, ScopeLog, StorageBackend, WalBackend};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::records::{next_timestamp, LedgerEntry};
use crate::traits::{LedgerReader, LedgerWriter};

/// Append-only, per-scope hash chains.
///
/// Each scope has its own writer lock, so appends to one scope are strictly
/// serialized while appends to different scopes run in parallel. Readers
/// take a snapshot of the committed entries and never wait on a writer.
/// An entry is persisted by the backend before it becomes visible.
pub struct ChainStore<B: StorageBackend = MemoryBackend> {
    backend: B,
    lock_timeout: Duration,
    scopes: RwLock<HashMap<ChainScope, Arc<ScopeChain<B::Log>>>>,
}

struct ScopeChain<L> {
    /// Held for the whole of an append. The log is opened on first use.
    writer: tokio::sync::Mutex<Option<L>>,
    committed: RwLock<Committed>,
}

#[derive(Default)]
struct Committed {
    entries: Vec<Arc<LedgerEntry>>,
    by_hash: HashMap<Digest, u64>,
}

impl Committed {
    fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        let mut committed = Self::default();
        for entry in entries {
            committed.push(entry);
        }
        committed
    }

    fn push(&mut self, entry: LedgerEntry) {
        self.by_hash.insert(entry.entry_hash, entry.sequence);
        self.entries.push(Arc::new(entry));
    }
}

impl<L> ScopeChain<L> {
    fn new(committed: Committed) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(None),
            committed: RwLock::new(committed),
        }
    }

    fn snapshot(&self) -> LedgerResult<Vec<Arc<LedgerEntry>>> {
        Ok(self.read()?.entries.clone())
    }

    fn read(&self) -> LedgerResult<std::sync::RwLockReadGuard<'_, Committed>> {
        self.committed
            .read()
            .map_err(|_| LedgerError::Storage("chain read lock poisoned".into()))
    }

    fn write(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, Committed>> {
        self.committed
            .write()
            .map_err(|_| LedgerError::Storage("chain write lock poisoned".into()))
    }
}

/// Outcome of [`ChainStore::fsck`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FsckReport {
    pub scopes_checked: usize,
    pub entries_checked: u64,
    /// `false` for the memory backend: there was nothing on disk to compare.
    pub compared_with_storage: bool,
}

impl ChainStore<MemoryBackend> {
    /// A store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            backend: MemoryBackend,
            lock_timeout: LedgerConfig::default().lock_timeout(),
            scopes: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for ChainStore<MemoryBackend> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ChainStore<WalBackend> {
    /// Open (or create) a durable store in `dir`, recovering every chain.
    pub fn open(dir: &Path, config: &LedgerConfig) -> LedgerResult<Self> {
        let backend = WalBackend::new(dir, config.wal.clone())?;
        Self::with_backend(backend, config.lock_timeout())
    }
}

impl<B: StorageBackend> ChainStore<B> {
    /// Build a store over `backend`, loading whatever it has persisted.
    pub fn with_backend(backend: B, lock_timeout: Duration) -> LedgerResult<Self> {
        let mut scopes = HashMap::new();
        let mut total = 0usize;
        for (scope, entries) in backend.recover()? {
            total += entries.len();
            scopes.insert(scope, Arc::new(ScopeChain::new(Committed::from_entries(entries))));
        }
        info!(scopes = scopes.len(), entries = total, "chain store opened");

        Ok(Self {
            backend,
            lock_timeout,
            scopes: RwLock::new(scopes),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Serialize `value` into a payload and append it.
    pub async fn append_value<T: Serialize>(
        &self,
        scope: &ChainScope,
        value: &T,
    ) -> LedgerResult<LedgerEntry> {
        let payload = payload_from(value)?;
        self.append(scope, payload).await
    }

    /// Re-read persisted entries and compare them with the committed chains.
    ///
    /// Any difference, or unreadable bytes in a segment, is storage-level
    /// corruption and fails with [`LedgerError::ChainIntegrity`].
    pub async fn fsck(&self) -> LedgerResult<FsckReport> {
        let mut report = FsckReport::default();
        for scope in self.scopes()? {
            let chain = self.existing(&scope)?;
            // Keep appends out while comparing.
            let _writer = self.lock_writer(&scope, &chain).await?;
            let committed = chain.snapshot()?;
            report.scopes_checked += 1;
            report.entries_checked += committed.len() as u64;

            let Some(persisted) = self.backend.read_back(&scope)? else {
                continue;
            };
            report.compared_with_storage = true;

            if persisted.len() != committed.len() {
                return Err(LedgerError::ChainIntegrity {
                    scope,
                    reason: format!(
                        "{} entries persisted, {} committed",
                        persisted.len(),
                        committed.len()
                    ),
                });
            }
            if let Some((on_disk, _)) = persisted
                .iter()
                .zip(committed.iter())
                .find(|(on_disk, in_memory)| *on_disk != in_memory.as_ref())
            {
                return Err(LedgerError::ChainIntegrity {
                    scope,
                    reason: format!("persisted entry {} differs from committed", on_disk.sequence),
                });
            }
        }
        info!(
            scopes = report.scopes_checked,
            entries = report.entries_checked,
            "fsck clean"
        );
        Ok(report)
    }

    fn scope_map(
        &self,
    ) -> LedgerResult<std::sync::RwLockReadGuard<'_, HashMap<ChainScope, Arc<ScopeChain<B::Log>>>>>
    {
        self.scopes
            .read()
            .map_err(|_| LedgerError::Storage("scope map lock poisoned".into()))
    }

    /// Chain for a scope that has at least its genesis entry.
    fn existing(&self, scope: &ChainScope) -> LedgerResult<Arc<ScopeChain<B::Log>>> {
        let chain = self
            .scope_map()?
            .get(scope)
            .cloned()
            .ok_or_else(|| LedgerError::ScopeNotFound(scope.clone()))?;
        if chain.read()?.entries.is_empty() {
            return Err(LedgerError::ScopeNotFound(scope.clone()));
        }
        Ok(chain)
    }

    fn get_or_create(&self, scope: &ChainScope) -> LedgerResult<Arc<ScopeChain<B::Log>>> {
        if let Some(chain) = self.scope_map()?.get(scope) {
            return Ok(chain.clone());
        }
        let mut scopes = self
            .scopes
            .write()
            .map_err(|_| LedgerError::Storage("scope map lock poisoned".into()))?;
        Ok(scopes
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(ScopeChain::new(Committed::default())))
            .clone())
    }

    async fn lock_writer<'a>(
        &self,
        scope: &ChainScope,
        chain: &'a ScopeChain<B::Log>,
    ) -> LedgerResult<tokio::sync::MutexGuard<'a, Option<B::Log>>> {
        tokio::time::timeout(self.lock_timeout, chain.writer.lock())
            .await
            .map_err(|_| {
                let waited_ms = self.lock_timeout.as_millis() as u64;
                warn!(scope = %scope, waited_ms, "append lock timeout");
                LedgerError::LockTimeout {
                    scope: scope.clone(),
                    waited_ms,
                }
            })
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, scope: &ChainScope, sequence: u64, f: impl FnOnce(&mut LedgerEntry)) {
        let chain = self.existing(scope).unwrap();
        let mut committed = chain.write().unwrap();
        let slot = &mut committed.entries[sequence as usize];
        let mut entry = slot.as_ref().clone();
        f(&mut entry);
        *slot = Arc::new(entry);
    }
}

#[async_trait]
impl<B: StorageBackend> LedgerWriter for ChainStore<B> {
    async fn append(&self, scope: &ChainScope, payload: Payload) -> LedgerResult<LedgerEntry> {
        let chain = self.get_or_create(scope)?;
        let mut writer = self.lock_writer(scope, &chain).await?;

        let log = match writer.take() {
            Some(log) => log,
            None => self.backend.open_log(scope)?,
        };
        let log = writer.insert(log);

        let tail = chain.read()?.entries.last().cloned();
        let (sequence, previous_hash) = match &tail {
            Some(tail) => (tail.sequence + 1, tail.entry_hash),
            None => (0, Digest::zero()),
        };
        let created_at = next_timestamp(tail.as_ref().map(|t| &t.created_at));
        let entry = LedgerEntry::seal(scope.clone(), sequence, payload, created_at, previous_hash);

        if let Err(err) = log.persist(&entry) {
            // Reopen on the next append so the backend re-checks the segment.
            *writer = None;
            return Err(err);
        }
        chain.write()?.push(entry.clone());

        debug!(
            scope = %scope,
            sequence,
            hash = %entry.entry_hash.short_hex(),
            "appended entry"
        );
        Ok(entry)
    }
}

impl<B: StorageBackend> LedgerReader for ChainStore<B> {
    fn get_entry(&self, scope: &ChainScope, sequence: u64) -> LedgerResult<LedgerEntry> {
        let chain = self.existing(scope)?;
        let committed = chain.read()?;
        committed
            .entries
            .get(sequence as usize)
            .map(|e| e.as_ref().clone())
            .ok_or_else(|| LedgerError::EntryNotFound {
                scope: scope.clone(),
                sequence,
            })
    }

    fn get_tail(&self, scope: &ChainScope) -> LedgerResult<Option<LedgerEntry>> {
        match self.existing(scope) {
            Ok(chain) => Ok(chain.read()?.entries.last().map(|e| e.as_ref().clone())),
            Err(LedgerError::ScopeNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_entries(
        &self,
        scope: &ChainScope,
        from_sequence: u64,
        to_sequence: u64,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        if from_sequence > to_sequence {
            return Err(LedgerError::InvalidRange {
                from: from_sequence,
                to: to_sequence,
            });
        }
        let chain = self.existing(scope)?;
        let committed = chain.read()?;
        let len = committed.entries.len() as u64;
        if from_sequence >= len {
            return Err(LedgerError::EntryNotFound {
                scope: scope.clone(),
                sequence: from_sequence,
            });
        }
        let end = to_sequence.min(len - 1);
        Ok(committed.entries[from_sequence as usize..=end as usize]
            .iter()
            .map(|e| e.as_ref().clone())
            .collect())
    }

    fn snapshot(&self, scope: &ChainScope) -> LedgerResult<Vec<Arc<LedgerEntry>>> {
        self.existing(scope)?.snapshot()
    }

    fn get_by_hash(&self, hash: &Digest) -> LedgerResult<Option<LedgerEntry>> {
        let chains: Vec<_> = self.scope_map()?.values().cloned().collect();
        for chain in chains {
            let committed = chain.read()?;
            if let Some(&seq) = committed.by_hash.get(hash) {
                return Ok(committed.entries.get(seq as usize).map(|e| e.as_ref().clone()));
            }
        }
        Ok(None)
    }

    fn scopes(&self) -> LedgerResult<Vec<ChainScope>> {
        let map = self.scope_map()?;
        let mut scopes = Vec::with_capacity(map.len());
        for (scope, chain) in map.iter() {
            if !chain.read()?.entries.is_empty() {
                scopes.push(scope.clone());
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    fn entry_count(&self, scope: &ChainScope) -> LedgerResult<u64> {
        match self.scope_map()?.get(scope) {
            Some(chain) => Ok(chain.read()?.entries.len() as u64),
            None => Ok(0),
        }
    }
}
