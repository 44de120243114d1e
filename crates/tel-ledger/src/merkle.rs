use tel_crypto::{MerkleProof, MerkleTree};
use tel_types::{ChainScope, Digest};
use tracing::debug;

use crate::error::LedgerError;
use crate::traits::LedgerReader;

/// Merkle roots and inclusion proofs over a scope's entry hashes.
///
/// Works on a snapshot, so a concurrent append is either wholly in the tree
/// or wholly absent.
pub struct MerkleBuilder;

impl MerkleBuilder {
    pub fn build_tree<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
    ) -> Result<MerkleTree, LedgerError> {
        let leaves: Vec<Digest> = reader
            .snapshot(scope)?
            .iter()
            .map(|entry| entry.entry_hash)
            .collect();
        Ok(MerkleTree::from_leaves(leaves))
    }

    pub fn build_root<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
    ) -> Result<Digest, LedgerError> {
        let tree = Self::build_tree(reader, scope)?;
        debug!(scope = %scope, leaves = tree.leaf_count(), root = %tree.root().short_hex(), "built merkle root");
        Ok(tree.root())
    }

    /// Inclusion proof for the entry at `sequence`.
    pub fn build_proof<R: LedgerReader + ?Sized>(
        reader: &R,
        scope: &ChainScope,
        sequence: u64,
    ) -> Result<MerkleProof, LedgerError> {
        let tree = Self::build_tree(reader, scope)?;
        usize::try_from(sequence)
            .ok()
            .and_then(|index| tree.proof(index))
            .ok_or_else(|| LedgerError::EntryNotFound {
                scope: scope.clone(),
                sequence,
            })
    }
}
