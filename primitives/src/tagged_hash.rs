//! BIP-340-style tagged hashing: `SHA256(SHA256(tag) || SHA256(tag) || msg)`.
//!
//! Shared by the Merkle commitment tree and the EOTS/Schnorr challenge hash
//! so that every domain in the agent that needs "hash with a fixed, public
//! label" uses the same construction with a distinct tag, per
//! SPEC_FULL.md §3.

use sha2::{Digest, Sha256};

pub fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
	let tag_hash = Sha256::digest(tag);
	let mut hasher = Sha256::new();
	hasher.update(tag_hash);
	hasher.update(tag_hash);
	for part in parts {
		hasher.update(part);
	}
	hasher.finalize().into()
}
