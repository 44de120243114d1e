use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tel_types::{ChainScope, Digest};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::LedgerError;
use crate::records::LedgerEntry;
use crate::traits::LedgerReader;

/// Why an entry failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// Recomputed `entry_hash` differs from the stored value.
    HashMismatch,
    /// `previous_hash` does not match the predecessor's stored `entry_hash`
    /// (or the genesis sentinel).
    PreviousHashMismatch,
    /// Stored sequence differs from the entry's position.
    SequenceGap,
    ScopeMismatch,
    /// `created_at` is earlier than the predecessor's.
    TimestampRegression,
}

impl BreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "hash_mismatch",
            Self::PreviousHashMismatch => "previous_hash_mismatch",
            Self::SequenceGap => "sequence_gap",
            Self::ScopeMismatch => "scope_mismatch",
            Self::TimestampRegression => "timestamp_regression",
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenEntry {
    pub sequence: u64,
    pub reason: BreakReason,
}

/// Result of replaying a chain. An invalid chain is data, not an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub chain_scope: ChainScope,
    pub entries_checked: u64,
    pub is_valid: bool,
    pub broken_entries: Vec<BrokenEntry>,
}

impl VerificationReport {
    /// Distinct sequences with at least one finding, ascending.
    pub fn broken_sequences(&self) -> Vec<u64> {
        let mut seqs: Vec<u64> = self.broken_entries.iter().map(|b| b.sequence).collect();
        seqs.sort_unstable();
        seqs.dedup();
        seqs
    }
}

/// How linkage is judged across a list of entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coverage {
    /// The list is the whole chain: position `i` must hold sequence `i`,
    /// and every entry links to the one before it.
    FullChain,
    /// The list is an ascending subset (an export). Linkage is checked only
    /// between entries with consecutive sequences, and the genesis sentinel
    /// only when sequence 0 is present.
    Subset,
}

/// Replays chains and reports every broken entry in a single pass.
pub struct ChainVerifier;

impl ChainVerifier {
    /// Verify every entry of `scope`.
    pub fn verify_chain<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
    ) -> Result<VerificationReport, LedgerError> {
        Self::verify_chain_cancellable(reader, scope, &CancelToken::new())
    }

    /// As [`verify_chain`](Self::verify_chain), checking `cancel` between
    /// entries.
    pub fn verify_chain_cancellable<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
        cancel: &CancelToken,
    ) -> Result<VerificationReport, LedgerError> {
        let snapshot = reader.snapshot(scope)?;
        let report = Self::verify_entries(
            scope,
            snapshot.iter().map(Arc::as_ref),
            Coverage::FullChain,
            cancel,
        )?;
        if report.is_valid {
            debug!(scope = %scope, entries = report.entries_checked, "chain verified");
        } else {
            warn!(
                scope = %scope,
                broken = report.broken_entries.len(),
                first = ?report.broken_entries.first().map(|b| b.sequence),
                "chain verification failed"
            );
        }
        Ok(report)
    }

    /// Verify every scope in the store.
    pub fn verify_all<R: LedgerReader + ?Sized>(
        reader: &R,
        cancel: &CancelToken,
    ) -> Result<Vec<VerificationReport>, LedgerError> {
        reader
            .scopes()?
            .iter()
            .map(|scope| Self::verify_chain_cancellable(reader, scope, cancel))
            .collect()
    }

    /// Check a sequence of entries without any store.
    pub fn verify_entries<'a, I>(
        scope: &ChainScope,
        entries: I,
        coverage: Coverage,
        cancel: &CancelToken,
    ) -> Result<VerificationReport, LedgerError>
    where
        I: IntoIterator<Item = &'a LedgerEntry>,
    {
        let mut broken = Vec::new();
        let mut checked = 0u64;
        let mut prev: Option<&LedgerEntry> = None;

        for (index, entry) in entries.into_iter().enumerate() {
            cancel.check()?;
            checked += 1;
            let mut flag = |reason| {
                broken.push(BrokenEntry {
                    sequence: entry.sequence,
                    reason,
                })
            };

            if entry.chain_scope != *scope {
                flag(BreakReason::ScopeMismatch);
            }

            let expected_seq = match (coverage, prev) {
                (Coverage::FullChain, _) => Some(index as u64),
                (Coverage::Subset, Some(p)) if entry.sequence <= p.sequence => Some(p.sequence + 1),
                (Coverage::Subset, _) => None,
            };
            if let Some(expected) = expected_seq {
                if entry.sequence != expected {
                    flag(BreakReason::SequenceGap);
                }
            }

            if entry.recompute_hash() != entry.entry_hash {
                flag(BreakReason::HashMismatch);
            }

            // Predecessor whose hash this entry must carry, if we hold it.
            let expected_prev: Option<Digest> = match (coverage, prev) {
                (Coverage::FullChain, None) => Some(Digest::zero()),
                (Coverage::FullChain, Some(p)) => Some(p.entry_hash),
                (Coverage::Subset, _) if entry.sequence == 0 => Some(Digest::zero()),
                (Coverage::Subset, Some(p)) if p.sequence + 1 == entry.sequence => {
                    Some(p.entry_hash)
                }
                (Coverage::Subset, _) => None,
            };
            if let Some(expected) = expected_prev {
                if entry.previous_hash != expected {
                    flag(BreakReason::PreviousHashMismatch);
                }
            }

            if let Some(p) = prev {
                if entry.created_at < p.created_at {
                    flag(BreakReason::TimestampRegression);
                }
            }

            prev = Some(entry);
        }

        Ok(VerificationReport {
            chain_scope: scope.clone(),
            entries_checked: checked,
            is_valid: broken.is_empty(),
            broken_entries: broken,
        })
    }
}
