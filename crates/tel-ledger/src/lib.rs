//! Append-only, hash-linked chains for the tamper-evident ledger (TEL).
//!
//! This crate is the heart of TEL. It provides:
//! - [`LedgerEntry`] records bound to their predecessor by hash
//! - `LedgerWriter` / `LedgerReader` trait boundaries
//! - [`ChainStore`] with a per-scope single writer, snapshot reads and
//!   pluggable storage (in memory, or one write-ahead log per scope)
//! - [`ChainVerifier`] replaying a chain and reporting every broken entry
//! - [`MerkleBuilder`] roots and inclusion proofs over a scope
//! - [`Exporter`] self-verifying export packages

pub mod backend;
pub mod cancel;
pub mod config;
pub mod error;
pub mod export;
pub mod merkle;
pub mod records;
pub mod store;
pub mod traits;
pub mod verify;
pub mod wal;

pub use backend::{MemoryBackend, RepairedSegment, ScopeLog, StorageBackend, WalBackend};
pub use cancel::CancelToken;
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use export::{ExportFilter, ExportPackage, Exporter, PackageReport, PackageSeal, PACKAGE_FORMAT_VERSION};
pub use merkle::MerkleBuilder;
pub use records::LedgerEntry;
pub use store::{ChainStore, FsckReport};
pub use traits::{LedgerReader, LedgerWriter};
pub use verify::{BreakReason, BrokenEntry, ChainVerifier, Coverage, VerificationReport};
pub use wal::{SyncMode, WalConfig, WriteAheadLog};

/// Check a Merkle inclusion proof against an expected root, without the chain.
pub use tel_crypto::verify_proof;
pub use tel_crypto::MerkleProof;
