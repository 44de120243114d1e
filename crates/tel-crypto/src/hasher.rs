use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tel_types::{ChainScope, Digest, Payload};

use crate::canonical::{canonicalize, to_canonical_bytes};

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"tel-entry-v1"`) that is
/// prepended to every hash computation. An entry hash, a Merkle node and a
/// package hash built from identical bytes therefore never collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for ledger entries.
    pub const ENTRY: Self = Self {
        domain: "tel-entry-v1",
    };
    /// Hasher for Merkle tree nodes.
    pub const MERKLE: Self = Self {
        domain: "tel-merkle-v1",
    };
    /// Hasher for export package stamps.
    pub const PACKAGE: Self = Self {
        domain: "tel-package-v1",
    };

    /// Name of the underlying digest algorithm, recorded in export packages.
    pub const ALGORITHM: &'static str = "blake3";

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash the canonical encoding of a serializable value.
    pub fn hash_canonical<T: serde::Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<Digest, HashError> {
        Ok(self.hash(&canonicalize(value)?))
    }

    /// Verify that data produces the expected digest.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// The five fields an entry hash commits to.
#[derive(Clone, Copy, Debug)]
pub struct EntryFields<'a> {
    pub chain_scope: &'a ChainScope,
    pub sequence: u64,
    pub payload: &'a Payload,
    pub created_at: &'a DateTime<Utc>,
    pub previous_hash: &'a Digest,
}

impl EntryFields<'_> {
    /// Canonical JSON object for these fields.
    pub fn to_value(&self) -> Value {
        json!({
            "chain_scope": self.chain_scope.as_str(),
            "sequence": self.sequence,
            "payload": Value::Object(self.payload.clone()),
            "created_at": canonical_timestamp(self.created_at),
            "previous_hash": self.previous_hash.to_hex(),
        })
    }
}

/// Compute the entry hash over `{chain_scope, sequence, payload, created_at,
/// previous_hash}`.
pub fn entry_hash(fields: &EntryFields<'_>) -> Digest {
    ContentHasher::ENTRY.hash(&to_canonical_bytes(&fields.to_value()))
}

/// Stamp for an ordered list of entry hashes.
pub fn package_hash(entry_hashes: &[Digest]) -> Digest {
    let list = Value::Array(
        entry_hashes
            .iter()
            .map(|h| Value::String(h.to_hex()))
            .collect(),
    );
    ContentHasher::PACKAGE.hash(&to_canonical_bytes(&list))
}

/// RFC 3339 timestamp with microsecond precision and a `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn scope() -> ChainScope {
        ChainScope::new("org-1").unwrap()
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn payload(json: &str) -> Payload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::ENTRY.hash(data), ContentHasher::ENTRY.hash(data));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let entry = ContentHasher::ENTRY.hash(data);
        let merkle = ContentHasher::MERKLE.hash(data);
        let package = ContentHasher::PACKAGE.hash(data);
        assert_ne!(entry, merkle);
        assert_ne!(entry, package);
        assert_ne!(merkle, package);
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::ENTRY.hash(b"original");
        assert!(ContentHasher::ENTRY.verify(b"original", &id));
        assert!(!ContentHasher::ENTRY.verify(b"tampered", &id));
    }

    #[test]
    fn entry_hash_ignores_payload_key_order_and_whitespace() {
        let (s, t, prev) = (scope(), ts(), Digest::zero());
        let a = payload(r#"{"event":"A","actor":"alice","n":1.0}"#);
        let b = payload("{ \"n\": 1,\n \"actor\": \"alice\", \"event\": \"A\" }");
        let hash_of = |p: &Payload| {
            entry_hash(&EntryFields {
                chain_scope: &s,
                sequence: 0,
                payload: p,
                created_at: &t,
                previous_hash: &prev,
            })
        };
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn every_field_is_bound() {
        let (s, t, prev) = (scope(), ts(), Digest::zero());
        let p = payload(r#"{"event":"A"}"#);
        let base = EntryFields {
            chain_scope: &s,
            sequence: 0,
            payload: &p,
            created_at: &t,
            previous_hash: &prev,
        };
        let h = entry_hash(&base);

        let other_scope = ChainScope::new("org-2").unwrap();
        assert_ne!(h, entry_hash(&EntryFields { chain_scope: &other_scope, ..base }));
        assert_ne!(h, entry_hash(&EntryFields { sequence: 1, ..base }));

        let other_payload = payload(r#"{"event":"B"}"#);
        assert_ne!(h, entry_hash(&EntryFields { payload: &other_payload, ..base }));

        let later = t + chrono::Duration::microseconds(1);
        assert_ne!(h, entry_hash(&EntryFields { created_at: &later, ..base }));

        let other_prev = Digest::from_hash([1; 32]);
        assert_ne!(h, entry_hash(&EntryFields { previous_hash: &other_prev, ..base }));
    }

    #[test]
    fn timestamp_has_microsecond_precision() {
        let t = ts() + chrono::Duration::microseconds(42);
        assert_eq!(canonical_timestamp(&t), "2024-03-01T12:00:00.000042Z");
    }

    #[test]
    fn package_hash_depends_on_order() {
        let a = Digest::from_hash([1; 32]);
        let b = Digest::from_hash([2; 32]);
        assert_ne!(package_hash(&[a, b]), package_hash(&[b, a]));
        assert_eq!(package_hash(&[a, b]), package_hash(&[a, b]));
    }

    #[test]
    fn hash_canonical_matches_manual_encoding() {
        let value = serde_json::json!({"b": 2, "a": 1});
        let expected = ContentHasher::PACKAGE.hash(br#"{"a":1,"b":2}"#);
        assert_eq!(ContentHasher::PACKAGE.hash_canonical(&value).unwrap(), expected);
    }

    proptest! {
        #[test]
        fn entry_hash_is_pure(seq in any::<u64>(), text in ".{0,40}") {
            let (s, t, prev) = (scope(), ts(), Digest::zero());
            let mut p = Payload::new();
            p.insert("text".into(), Value::String(text));
            let fields = EntryFields {
                chain_scope: &s,
                sequence: seq,
                payload: &p,
                created_at: &t,
                previous_hash: &prev,
            };
            prop_assert_eq!(entry_hash(&fields), entry_hash(&fields));
        }
    }
}
