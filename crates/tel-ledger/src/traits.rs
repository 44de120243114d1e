use std::sync::Arc;

use async_trait::async_trait;
use tel_types::{ChainScope, Digest, Payload};

use crate::error::LedgerError;
use crate::records::LedgerEntry;

/// Write boundary: the only way entries come into existence.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Append a payload to `scope`, creating the scope on first append.
    ///
    /// Appends to the same scope are strictly serialized; the returned entry
    /// is durable before this call returns.
    async fn append(&self, scope: &ChainScope, payload: Payload) -> Result<LedgerEntry, LedgerError>;
}

/// Read boundary. Every read observes a consistent prefix of the chain.
pub trait LedgerReader: Send + Sync {
    /// Entry at `sequence`, or `EntryNotFound` beyond the tail.
    fn get_entry(&self, scope: &ChainScope, sequence: u64) -> Result<LedgerEntry, LedgerError>;

    /// Latest entry, or `None` for a scope with no entries.
    fn get_tail(&self, scope: &ChainScope) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Entries in the inclusive range `from..=to`; `to` is clamped to the tail.
    fn list_entries(
        &self,
        scope: &ChainScope,
        from_sequence: u64,
        to_sequence: u64,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Shared snapshot of the whole chain.
    fn snapshot(&self, scope: &ChainScope) -> Result<Vec<Arc<LedgerEntry>>, LedgerError>;

    fn get_by_hash(&self, hash: &Digest) -> Result<Option<LedgerEntry>, LedgerError>;

    fn scopes(&self) -> Result<Vec<ChainScope>, LedgerError>;

    fn entry_count(&self, scope: &ChainScope) -> Result<u64, LedgerError>;
}
