use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tel_crypto::{entry_hash, EntryFields};
use tel_types::{ChainScope, Digest, Payload};

/// The atomic, immutable unit of a chain.
///
/// Created exactly once by the chain store in response to an append. The
/// `entry_hash` is a pure function of the other five fields; recomputing it
/// must always reproduce the stored value for an untampered chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub chain_scope: ChainScope,
    /// Zero-based, gap-free, never reused within a scope.
    pub sequence: u64,
    pub payload: Payload,
    /// Stamped by the ledger at append time, never by the caller.
    pub created_at: DateTime<Utc>,
    /// `entry_hash` of the entry at `sequence - 1`, or [`Digest::zero`] for genesis.
    pub previous_hash: Digest,
    pub entry_hash: Digest,
}

impl LedgerEntry {
    /// Build an entry and compute its hash.
    pub fn seal(
        chain_scope: ChainScope,
        sequence: u64,
        payload: Payload,
        created_at: DateTime<Utc>,
        previous_hash: Digest,
    ) -> Self {
        let mut entry = Self {
            chain_scope,
            sequence,
            payload,
            created_at,
            previous_hash,
            entry_hash: Digest::zero(),
        };
        entry.entry_hash = entry.recompute_hash();
        entry
    }

    /// The hashed fields of this entry.
    pub fn fields(&self) -> EntryFields<'_> {
        EntryFields {
            chain_scope: &self.chain_scope,
            sequence: self.sequence,
            payload: &self.payload,
            created_at: &self.created_at,
            previous_hash: &self.previous_hash,
        }
    }

    /// Recompute the entry hash from the stored fields.
    pub fn recompute_hash(&self) -> Digest {
        entry_hash(&self.fields())
    }

    /// Returns `true` if the stored hash matches the stored fields.
    pub fn hash_is_valid(&self) -> bool {
        self.recompute_hash() == self.entry_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence == 0
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{}#{} {} prev={}",
            self.chain_scope,
            self.sequence,
            self.entry_hash.short_hex(),
            self.previous_hash.short_hex()
        )
    }
}

/// Timestamp for the next entry after `previous`.
///
/// Wall clock truncated to microseconds (the precision of the canonical
/// form), never earlier than the predecessor's timestamp.
pub(crate) fn next_timestamp(previous: Option<&DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(prev) if *prev > now => *prev,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: serde_json::Value) -> Payload {
        match v {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn entry() -> LedgerEntry {
        LedgerEntry::seal(
            ChainScope::new("org-1").unwrap(),
            0,
            payload(json!({"event": "A"})),
            next_timestamp(None),
            Digest::zero(),
        )
    }

    #[test]
    fn sealed_entry_has_valid_hash() {
        let e = entry();
        assert!(e.hash_is_valid());
        assert!(e.is_genesis());
        assert!(e.previous_hash.is_zero());
    }

    #[test]
    fn payload_tampering_invalidates_hash() {
        let mut e = entry();
        e.payload.insert("event".into(), json!("B"));
        assert!(!e.hash_is_valid());
    }

    #[test]
    fn json_roundtrip_preserves_hash() {
        let e = entry();
        let json = serde_json::to_string(&e).unwrap();
        let parsed: LedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, e);
        assert!(parsed.hash_is_valid());
    }

    #[test]
    fn persisted_form_uses_lowercase_hex() {
        let e = entry();
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["previous_hash"], "0".repeat(64));
        assert_eq!(json["entry_hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn timestamps_never_regress() {
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(next_timestamp(Some(&future)), future);
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(next_timestamp(Some(&past)) > past);
    }
}
