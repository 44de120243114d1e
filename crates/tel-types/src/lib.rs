//! Foundation types for the tamper-evident ledger (TEL).
//!
//! This crate provides the identity and structural types shared by every
//! other TEL crate.
//!
//! # Key Types
//!
//! - [`Digest`]: 256-bit digest, stored and displayed as 64 lowercase hex characters
//! - [`ChainScope`]: Partition key isolating one append-only chain from another
//! - [`Payload`]: Caller-supplied structured content notarized by an entry

pub mod digest;
pub mod error;
pub mod payload;
pub mod scope;

pub use digest::Digest;
pub use error::TypeError;
pub use payload::{payload_from, Payload};
pub use scope::ChainScope;
