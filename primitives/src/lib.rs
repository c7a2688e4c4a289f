//! Shared data types for the finality-provider agent.
//!
//! Kept dependency-light and free of any I/O so that every other crate in
//! the workspace (`eots`, `store`, `chain-client`, `fpd`) can depend on it
//! without pulling in `rocksdb`, `tokio`, or RPC clients.

pub mod error;
pub mod merkle;
pub mod tagged_hash;

pub use error::AgentError;

use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

/// A block header as reported by the consumer-chain client.
///
/// Immutable; the agent trusts the height/hash pair it is handed and never
/// independently validates block contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
	pub height: u64,
	pub hash: [u8; 32],
}

impl BlockInfo {
	pub fn new(height: u64, hash: [u8; 32]) -> Self {
		Self { height, hash }
	}
}

/// A registered finality provider.
///
/// Created once at registration and never deleted; `last_voted_height` is
/// the only field mutated afterwards, and only ever upward (I3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityProviderRecord {
	#[serde(with = "xonly_pubkey_serde")]
	pub btc_pk: XOnlyPublicKey,
	pub addr: String,
	pub chain_id: String,
	pub description: String,
	/// Commission rate in basis points (1/100th of a percent).
	pub commission_bps: u16,
	pub last_voted_height: u64,
}

impl FinalityProviderRecord {
	/// Accepts the new height only if it is strictly greater than the
	/// current one (I3: `last_voted_height` is monotonically
	/// non-decreasing).
	pub fn try_update_last_voted_height(&mut self, height: u64) -> bool {
		if height > self.last_voted_height {
			self.last_voted_height = height;
			true
		} else {
			false
		}
	}
}

/// The latest published public-randomness commitment for a provider on a
/// given chain. The chain is assumed to retain only the latest one per
/// `(btc_pk, chain_id)` pair (spec I4/I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubRandCommit {
	pub start_height: u64,
	pub num_pub_rand: u32,
	pub commitment: [u8; 32],
}

impl PubRandCommit {
	/// The height one past the end of the committed range, i.e. the first
	/// height that is *not* covered by this commitment.
	pub fn end_height(&self) -> u64 {
		self.start_height + self.num_pub_rand as u64
	}

	pub fn covers(&self, height: u64) -> bool {
		height >= self.start_height && height < self.end_height()
	}
}

/// Opaque handle to a transaction the chain has accepted into its mempool
/// or block. The agent does not interpret the contents; it only needs to
/// know the submission succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
	pub tx_hash: String,
	pub height: Option<u64>,
}

mod xonly_pubkey_serde {
	use secp256k1::XOnlyPublicKey;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(pk: &XOnlyPublicKey, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_bytes(&pk.serialize())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<XOnlyPublicKey, D::Error> {
		let bytes = <Vec<u8>>::deserialize(d)?;
		XOnlyPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn last_voted_height_only_moves_forward() {
		let mut fp = FinalityProviderRecord {
			btc_pk: test_pubkey(),
			addr: "addr".into(),
			chain_id: "chain".into(),
			description: "".into(),
			commission_bps: 500,
			last_voted_height: 100,
		};

		assert!(!fp.try_update_last_voted_height(100));
		assert!(!fp.try_update_last_voted_height(99));
		assert!(fp.try_update_last_voted_height(101));
		assert_eq!(fp.last_voted_height, 101);
	}

	#[test]
	fn pub_rand_commit_range() {
		let commit = PubRandCommit { start_height: 1200, num_pub_rand: 1000, commitment: [0; 32] };
		assert!(commit.covers(1200));
		assert!(commit.covers(2199));
		assert!(!commit.covers(2200));
		assert_eq!(commit.end_height(), 2200);
	}

	fn test_pubkey() -> XOnlyPublicKey {
		let sk = secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
		let keypair = secp256k1::Keypair::from_secret_key(secp256k1::SECP256K1, &sk);
		keypair.x_only_public_key().0
	}
}
