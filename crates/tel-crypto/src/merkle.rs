use serde::{Deserialize, Serialize};
use tel_types::Digest;

use crate::hasher::ContentHasher;

/// Side a sibling occupies relative to the running hash in a proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Binary Merkle tree over an ordered list of entry hashes.
///
/// Adjacent hashes are paired left to right. A level of odd length pairs its
/// final hash with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Digest,
    /// Level 0 = leaves, last level = `[root]`. Empty for an empty tree.
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes.
    ///
    /// An empty list has the root [`empty_root`]. A single leaf is its own root.
    pub fn from_leaves(leaves: Vec<Digest>) -> Self {
        if leaves.is_empty() {
            return Self {
                root: empty_root(),
                levels: vec![],
            };
        }

        let mut levels: Vec<Vec<Digest>> = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [only] => hash_pair(only, only),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        let root = levels[levels.len() - 1][0];
        Self { root, levels }
    }

    /// The root hash of the tree.
    pub fn root(&self) -> Digest {
        self.root
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Inclusion proof for the leaf at `index`, ordered leaf to root.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaves = self.levels.first()?;
        let target_hash = *leaves.get(index)?;

        let mut sibling_path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let step = if idx % 2 == 0 {
                // Last element of an odd level pairs with itself.
                let hash = level.get(idx + 1).copied().unwrap_or(level[idx]);
                ProofStep {
                    hash,
                    side: Side::Right,
                }
            } else {
                ProofStep {
                    hash: level[idx - 1],
                    side: Side::Left,
                }
            };
            sibling_path.push(step);
            idx /= 2;
        }

        Some(MerkleProof {
            target_sequence: index as u64,
            target_hash,
            sibling_path,
            leaf_count: leaves.len() as u64,
        })
    }
}

/// One step of an inclusion proof: the sibling hash and its side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: Digest,
    pub side: Side,
}

/// Merkle inclusion proof.
///
/// Sufficient to recompute the root from `target_hash` alone, in
/// O(log n) steps, without access to the rest of the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub target_sequence: u64,
    pub target_hash: Digest,
    pub sibling_path: Vec<ProofStep>,
    /// Size of the tree the proof was built from. Informational.
    pub leaf_count: u64,
}

impl MerkleProof {
    /// Recompute the root from the target hash and the sibling path.
    pub fn compute_root(&self) -> Digest {
        self.sibling_path
            .iter()
            .fold(self.target_hash, |current, step| match step.side {
                Side::Left => hash_pair(&step.hash, &current),
                Side::Right => hash_pair(&current, &step.hash),
            })
    }

    /// Verify the proof against an expected root.
    pub fn verify(&self, expected_root: &Digest) -> bool {
        self.compute_root() == *expected_root
    }
}

/// Verify an inclusion proof against an expected root.
pub fn verify_proof(proof: &MerkleProof, expected_root: &Digest) -> bool {
    proof.verify(expected_root)
}

/// Root of a tree with no leaves: the Merkle hash of empty input.
pub fn empty_root() -> Digest {
    ContentHasher::MERKLE.hash(&[])
}

/// Parent of two nodes: the Merkle hash of their concatenation.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    ContentHasher::MERKLE.hash(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(seed: u8) -> Digest {
        ContentHasher::ENTRY.hash(&[seed])
    }

    #[test]
    fn empty_tree_root_is_hash_of_empty_input() {
        let tree = MerkleTree::from_leaves(vec![]);
        assert_eq!(tree.root(), ContentHasher::MERKLE.hash(b""));
        assert_eq!(tree.leaf_count(), 0);
        assert!(tree.proof(0).is_none());
    }

    #[test]
    fn single_leaf_is_root() {
        let l = leaf(1);
        let tree = MerkleTree::from_leaves(vec![l]);
        assert_eq!(tree.root(), l);

        let proof = tree.proof(0).unwrap();
        assert!(proof.sibling_path.is_empty());
        assert!(proof.verify(&l));
    }

    #[test]
    fn two_leaves_hash_to_parent() {
        let tree = MerkleTree::from_leaves(vec![leaf(1), leaf(2)]);
        assert_eq!(tree.root(), hash_pair(&leaf(1), &leaf(2)));
    }

    #[test]
    fn odd_level_duplicates_last_hash() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let tree = MerkleTree::from_leaves(vec![a, b, c]);
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn last_leaf_of_odd_level_self_pairs() {
        let leaves: Vec<Digest> = (0..5).map(leaf).collect();
        let tree = MerkleTree::from_leaves(leaves.clone());
        let proof = tree.proof(4).unwrap();
        assert_eq!(proof.sibling_path[0].hash, leaves[4]);
        assert_eq!(proof.sibling_path[0].side, Side::Right);
        assert!(proof.verify(&tree.root()));
    }

    #[test]
    fn proof_verifies_for_all_leaves() {
        let leaves: Vec<Digest> = (0..7).map(leaf).collect();
        let tree = MerkleTree::from_leaves(leaves.clone());

        for (i, expected) in leaves.iter().enumerate() {
            let proof = tree.proof(i).expect("proof should exist");
            assert_eq!(proof.target_hash, *expected);
            assert_eq!(proof.target_sequence, i as u64);
            assert!(verify_proof(&proof, &tree.root()), "proof for leaf {i} should verify");
        }
    }

    #[test]
    fn proof_out_of_bounds_returns_none() {
        let tree = MerkleTree::from_leaves(vec![leaf(1), leaf(2)]);
        assert!(tree.proof(5).is_none());
    }

    #[test]
    fn tampered_target_fails_verification() {
        let tree = MerkleTree::from_leaves((0..4).map(leaf).collect());
        let mut proof = tree.proof(0).unwrap();
        proof.target_hash = leaf(99);
        assert!(!proof.verify(&tree.root()));
    }

    #[test]
    fn flipped_side_fails_verification() {
        let tree = MerkleTree::from_leaves((0..4).map(leaf).collect());
        let mut proof = tree.proof(1).unwrap();
        proof.sibling_path[0].side = Side::Right;
        assert!(!proof.verify(&tree.root()));
    }

    #[test]
    fn power_of_two_path_length() {
        let tree = MerkleTree::from_leaves((0..8).map(leaf).collect());
        for i in 0..8 {
            let proof = tree.proof(i).unwrap();
            assert_eq!(proof.sibling_path.len(), 3);
            assert!(proof.verify(&tree.root()));
        }
    }

    #[test]
    fn proof_serde_uses_hex_and_lowercase_sides() {
        let tree = MerkleTree::from_leaves((0..4).map(leaf).collect());
        let proof = tree.proof(2).unwrap();
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["sibling_path"][0]["side"], "right");
        assert_eq!(json["target_hash"], proof.target_hash.to_hex());

        let parsed: MerkleProof = serde_json::from_value(json).unwrap();
        assert!(parsed.verify(&tree.root()));
    }

    proptest! {
        #[test]
        fn every_proof_round_trips(n in 1usize..40, pick in any::<prop::sample::Index>()) {
            let leaves: Vec<Digest> = (0..n).map(|i| leaf(i as u8)).collect();
            let tree = MerkleTree::from_leaves(leaves);
            let index = pick.index(n);
            let proof = tree.proof(index).unwrap();
            prop_assert!(proof.verify(&tree.root()));
        }

        #[test]
        fn any_corrupted_sibling_breaks_proof(
            n in 2usize..40,
            pick in any::<prop::sample::Index>(),
            step in any::<prop::sample::Index>(),
        ) {
            let leaves: Vec<Digest> = (0..n).map(|i| leaf(i as u8)).collect();
            let tree = MerkleTree::from_leaves(leaves);
            let mut proof = tree.proof(pick.index(n)).unwrap();
            let s = step.index(proof.sibling_path.len());
            let mut bytes = *proof.sibling_path[s].hash.as_bytes();
            bytes[0] ^= 0x01;
            proof.sibling_path[s].hash = Digest::from_hash(bytes);
            prop_assert!(!proof.verify(&tree.root()));
        }
    }
}
