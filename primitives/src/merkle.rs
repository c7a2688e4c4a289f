//! Merkle commitment tree over a batch of public-randomness values.
//!
//! Leaf and internal hashes use BIP-340-style tagged hashing (the same
//! `SHA256(SHA256(tag) || SHA256(tag) || msg)` construction as the Schnorr
//! challenge hash in `eots::crypto`), with distinct tags so a leaf hash can
//! never be replayed as an internal node hash or a signing challenge.
//! Odd-width levels duplicate the last node, matching the on-chain verifier
//! convention spec.md §4.E requires ("must match the on-chain verifier
//! exactly" — this is the one fixed convention this implementation commits
//! to; see SPEC_FULL.md).

use crate::tagged_hash::tagged_hash;

const MERKLE_LEAF_TAG: &[u8] = b"EOTS/merkle-leaf";
const MERKLE_NODE_TAG: &[u8] = b"EOTS/merkle-node";

fn leaf_hash(pub_rand: &[u8; 32]) -> [u8; 32] {
	tagged_hash(MERKLE_LEAF_TAG, &[pub_rand])
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
	tagged_hash(MERKLE_NODE_TAG, &[left, right])
}

/// One step of an inclusion proof: the hash of the sibling subtree, and
/// whether that sibling sits to the left of the node being proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProofStep {
	pub sibling_hash: [u8; 32],
	pub sibling_is_left: bool,
}

/// An inclusion proof for one leaf of a [`MerkleTree`].
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
	pub steps: Vec<ProofStep>,
}

impl MerkleProof {
	/// Recomputes the root a leaf would produce under this proof.
	pub fn compute_root(&self, leaf: &[u8; 32]) -> [u8; 32] {
		let mut current = leaf_hash(leaf);
		for step in &self.steps {
			current = if step.sibling_is_left {
				node_hash(&step.sibling_hash, &current)
			} else {
				node_hash(&current, &step.sibling_hash)
			};
		}
		current
	}

	/// Verifies that `leaf` is included under `root`.
	pub fn verify(&self, leaf: &[u8; 32], root: &[u8; 32]) -> bool {
		&self.compute_root(leaf) == root
	}
}

/// A Merkle tree built bottom-up over an ordered list of 32-byte leaves
/// (public randomness values). Retains every level so inclusion proofs for
/// any leaf can be produced in O(log n).
pub struct MerkleTree {
	/// `levels[0]` is the leaf-hash level, `levels.last()` has exactly one
	/// element: the root.
	levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
	/// Builds a tree over `leaves`. Panics if `leaves` is empty — callers
	/// never commit a zero-length batch (spec.md never allows `N = 0`).
	pub fn build(leaves: &[[u8; 32]]) -> Self {
		assert!(!leaves.is_empty(), "cannot build a Merkle tree over zero leaves");

		let mut levels = vec![leaves.iter().map(leaf_hash).collect::<Vec<_>>()];

		while levels.last().unwrap().len() > 1 {
			let prev = levels.last().unwrap();
			let mut next = Vec::with_capacity(prev.len().div_ceil(2));
			let mut it = prev.chunks(2);
			while let Some(pair) = it.next() {
				let left = pair[0];
				// Odd width: duplicate the last node.
				let right = pair.get(1).copied().unwrap_or(left);
				next.push(node_hash(&left, &right));
			}
			levels.push(next);
		}

		Self { levels }
	}

	pub fn root(&self) -> [u8; 32] {
		self.levels.last().unwrap()[0]
	}

	/// Produces the inclusion proof for the leaf at `index` in the
	/// original (pre-hash) leaf list.
	pub fn proof(&self, mut index: usize) -> MerkleProof {
		let mut steps = Vec::with_capacity(self.levels.len() - 1);

		for level in &self.levels[..self.levels.len() - 1] {
			let sibling_index = if index % 2 == 0 {
				// Duplicate-last rule: an odd-width level's last node is
				// its own sibling.
				(index + 1).min(level.len() - 1)
			} else {
				index - 1
			};
			steps.push(ProofStep {
				sibling_hash: level[sibling_index],
				sibling_is_left: sibling_index < index,
			});
			index /= 2;
		}

		MerkleProof { steps }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn leaves(n: usize) -> Vec<[u8; 32]> {
		(0..n)
			.map(|i| {
				let mut l = [0u8; 32];
				l[..8].copy_from_slice(&(i as u64).to_be_bytes());
				l
			})
			.collect()
	}

	#[test]
	fn every_leaf_verifies_against_the_root_even_width() {
		let ls = leaves(8);
		let tree = MerkleTree::build(&ls);
		let root = tree.root();
		for (i, leaf) in ls.iter().enumerate() {
			assert!(tree.proof(i).verify(leaf, &root), "leaf {i} failed to verify");
		}
	}

	#[test]
	fn every_leaf_verifies_against_the_root_odd_width() {
		let ls = leaves(7);
		let tree = MerkleTree::build(&ls);
		let root = tree.root();
		for (i, leaf) in ls.iter().enumerate() {
			assert!(tree.proof(i).verify(leaf, &root), "leaf {i} failed to verify");
		}
	}

	#[test]
	fn single_leaf_tree() {
		let ls = leaves(1);
		let tree = MerkleTree::build(&ls);
		let root = tree.root();
		assert!(tree.proof(0).verify(&ls[0], &root));
	}

	#[test]
	fn tampered_leaf_fails_to_verify() {
		let ls = leaves(4);
		let tree = MerkleTree::build(&ls);
		let root = tree.root();
		let wrong_leaf = [0xffu8; 32];
		assert!(!tree.proof(0).verify(&wrong_leaf, &root));
	}

	#[test]
	fn leaf_hash_cannot_be_mistaken_for_a_node_hash() {
		// Same preimage bytes, different tag => different outputs.
		let l = leaf_hash(&[3u8; 32]);
		let n = node_hash(&[3u8; 32], &[0u8; 32]);
		assert_ne!(l, n);
	}
}
