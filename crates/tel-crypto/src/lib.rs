//! Cryptographic primitives for the tamper-evident ledger.
//!
//! Provides the canonical hasher (deterministic JSON encoding plus
//! domain-separated BLAKE3), binary Merkle trees with inclusion proofs, and
//! Ed25519 signing for export packages.
//!
//! All crypto operations wrap established libraries.

pub mod canonical;
pub mod hasher;
pub mod merkle;
pub mod signer;

pub use canonical::{canonicalize, to_canonical_bytes};
pub use hasher::{canonical_timestamp, entry_hash, package_hash, ContentHasher, EntryFields, HashError};
pub use merkle::{empty_root, hash_pair, verify_proof, MerkleProof, MerkleTree, ProofStep, Side};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
