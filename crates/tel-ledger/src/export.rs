use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tel_crypto::{package_hash, ContentHasher, MerkleTree, Signature, SigningKey, VerifyingKey};
use tel_types::{ChainScope, Digest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::LedgerError;
use crate::records::LedgerEntry;
use crate::traits::LedgerReader;
use crate::verify::{ChainVerifier, Coverage, VerificationReport};

/// Current package layout version.
pub const PACKAGE_FORMAT_VERSION: u32 = 1;

/// Selects which entries go into an export.
#[derive(Clone, Default)]
pub enum ExportFilter {
    #[default]
    All,
    /// Inclusive sequence range.
    SequenceRange { from: u64, to: u64 },
    /// Entries whose payload carries `field == value`, e.g. a related
    /// business entity id.
    PayloadField {
        field: String,
        value: serde_json::Value,
    },
    Custom(Arc<dyn Fn(&LedgerEntry) -> bool + Send + Sync>),
}

impl ExportFilter {
    pub fn custom(predicate: impl Fn(&LedgerEntry) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        match self {
            Self::All => true,
            Self::SequenceRange { from, to } => (*from..=*to).contains(&entry.sequence),
            Self::PayloadField { field, value } => entry.payload.get(field) == Some(value),
            Self::Custom(predicate) => predicate(entry),
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        match self {
            Self::SequenceRange { from, to } if from > to => Err(LedgerError::InvalidRange {
                from: *from,
                to: *to,
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ExportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::SequenceRange { from, to } => write!(f, "SequenceRange({from}..={to})"),
            Self::PayloadField { field, value } => write!(f, "PayloadField({field} == {value})"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Ed25519 signature over the package hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSeal {
    pub public_key: VerifyingKey,
    pub signature: Signature,
}

/// Self-describing bundle of entries for external audit.
///
/// Verifiable with no access to the live store: every entry hash can be
/// recomputed, and `package_hash` binds the ordered entry hashes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportPackage {
    pub format_version: u32,
    pub package_id: Uuid,
    pub chain_scope: ChainScope,
    pub digest_algorithm: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<LedgerEntry>,
    /// Merkle root over the contained entry hashes.
    pub merkle_root: Digest,
    pub package_hash: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal: Option<PackageSeal>,
}

/// Outcome of checking a package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReport {
    pub package_id: Uuid,
    pub format_supported: bool,
    /// Per-entry findings, with linkage checked between consecutive
    /// sequences only.
    pub entries: VerificationReport,
    pub recomputed_package_hash: Digest,
    pub package_hash_valid: bool,
    pub merkle_root_valid: bool,
    /// `None` when the package is unsigned.
    pub signature_valid: Option<bool>,
    pub is_valid: bool,
}

impl ExportPackage {
    fn assemble(chain_scope: ChainScope, entries: Vec<LedgerEntry>) -> Self {
        let hashes: Vec<Digest> = entries.iter().map(|e| e.entry_hash).collect();
        Self {
            format_version: PACKAGE_FORMAT_VERSION,
            package_id: Uuid::now_v7(),
            chain_scope,
            digest_algorithm: ContentHasher::ALGORITHM.to_owned(),
            exported_at: Utc::now(),
            package_hash: package_hash(&hashes),
            merkle_root: MerkleTree::from_leaves(hashes).root(),
            entries,
            seal: None,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Seal the package hash with `key`, replacing any previous seal.
    pub fn sign(&mut self, key: &SigningKey) {
        self.seal = Some(PackageSeal {
            public_key: key.verifying_key(),
            signature: key.sign_digest(&self.package_hash),
        });
    }

    pub fn verify(&self) -> Result<PackageReport, LedgerError> {
        self.verify_cancellable(&CancelToken::new())
    }

    /// Re-check every entry and recompute the package hash from the
    /// recomputed entry hashes, so any edit to a contained entry shows up.
    pub fn verify_cancellable(&self, cancel: &CancelToken) -> Result<PackageReport, LedgerError> {
        let format_supported = self.format_version == PACKAGE_FORMAT_VERSION
            && self.digest_algorithm == ContentHasher::ALGORITHM;

        let entries = ChainVerifier::verify_entries(
            &self.chain_scope,
            &self.entries,
            Coverage::Subset,
            cancel,
        )?;

        let recomputed: Vec<Digest> = self.entries.iter().map(LedgerEntry::recompute_hash).collect();
        let recomputed_package_hash = package_hash(&recomputed);
        let package_hash_valid = recomputed_package_hash == self.package_hash;
        let merkle_root_valid = MerkleTree::from_leaves(recomputed).root() == self.merkle_root;

        let signature_valid = self.seal.as_ref().map(|seal| {
            seal.public_key
                .verify_digest(&self.package_hash, &seal.signature)
                .is_ok()
        });

        let is_valid = format_supported
            && entries.is_valid
            && package_hash_valid
            && merkle_root_valid
            && signature_valid != Some(false);
        if !is_valid {
            warn!(
                package = %self.package_id,
                scope = %self.chain_scope,
                package_hash_valid,
                merkle_root_valid,
                broken = entries.broken_entries.len(),
                "export package failed verification"
            );
        }

        Ok(PackageReport {
            package_id: self.package_id,
            format_supported,
            entries,
            recomputed_package_hash,
            package_hash_valid,
            merkle_root_valid,
            signature_valid,
            is_valid,
        })
    }

    /// Write as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, LedgerError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

/// Builds export packages from a snapshot of a scope.
pub struct Exporter;

impl Exporter {
    pub fn export<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
        filter: &ExportFilter,
    ) -> Result<ExportPackage, LedgerError> {
        Self::export_cancellable(reader, scope, filter, &CancelToken::new())
    }

    pub fn export_cancellable<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
        filter: &ExportFilter,
        cancel: &CancelToken,
    ) -> Result<ExportPackage, LedgerError> {
        filter.validate()?;
        let snapshot = reader.snapshot(scope)?;

        let mut selected = Vec::new();
        for entry in &snapshot {
            cancel.check()?;
            if filter.matches(entry) {
                selected.push(entry.as_ref().clone());
            }
        }

        let package = ExportPackage::assemble(scope.clone(), selected);
        info!(
            scope = %scope,
            package = %package.package_id,
            entries = package.entries.len(),
            of = snapshot.len(),
            filter = ?filter,
            "exported chain"
        );
        Ok(package)
    }
}
