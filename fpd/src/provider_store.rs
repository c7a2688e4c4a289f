//! Finality-provider and proof persistence (spec.md §4.C / §4.D).
//!
//! Both stores share the same [`fp_store::PersistentKv`] instance used by
//! [`fp_eots::NonceStore`], in a separate namespace each, following the same
//! prefix-plus-big-endian-suffix convention (spec.md §6: `proofs/{pk}/{chain_id}/{be_u64 height}`,
//! `fps/{pk}`).

use std::sync::Arc;

use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};

use fp_primitives::{merkle::MerkleProof, AgentError, FinalityProviderRecord};
use fp_store::{Namespace, PersistentKv, StoreError};

const PROOFS_NAMESPACE_TAG: &[u8] = b"proofs";
const FPS_NAMESPACE_TAG: &[u8] = b"fps";

/// `(btc_pk, chain_id, height)`, the key every inclusion proof is addressed
/// by. Shares its encoding with `fp_eots::nonce_store::NonceKey` so proofs
/// and nonces line up one-to-one for a given height.
fn proof_key(btc_pk: &XOnlyPublicKey, chain_id: &str, height: u64) -> Vec<u8> {
	let chain_bytes = chain_id.as_bytes();
	assert!(chain_bytes.len() <= u8::MAX as usize, "chain_id too long to encode");
	let mut out = Vec::with_capacity(32 + 1 + chain_bytes.len() + 8);
	out.extend_from_slice(&btc_pk.serialize());
	out.push(chain_bytes.len() as u8);
	out.extend_from_slice(chain_bytes);
	out.extend_from_slice(&height.to_be_bytes());
	out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ProofRecord {
	proof: MerkleProof,
	/// The public randomness value the proof is for, retained so a mismatch
	/// between a re-derived nonce and the stored proof is detectable as
	/// corruption rather than silently producing an unverifiable vote.
	pub_rand: [u8; 32],
}

/// Errors raised by [`ProofStore`], mirroring the vocabulary spec.md §4.C
/// uses ("insertions are idempotent only when the stored bytes equal the
/// incoming bytes; otherwise Conflict").
#[derive(Debug, thiserror::Error)]
pub enum ProofStoreError {
	#[error("a different proof is already stored for this (btc_pk, chain_id, height)")]
	Conflict,

	#[error(transparent)]
	Store(#[from] StoreError),
}

impl ProofStoreError {
	pub fn into_agent_error(self, btc_pk: XOnlyPublicKey, chain_id: String, height: u64) -> AgentError {
		match self {
			ProofStoreError::Conflict => AgentError::Corruption(format!(
				"conflicting proof stored for {btc_pk}/{chain_id}/{height}"
			)),
			ProofStoreError::Store(e) => AgentError::Corruption(e.to_string()),
		}
	}
}

/// Ordered map `(btc_pk, chain_id, height) -> MerkleProof` (spec.md §4.C).
pub struct ProofStore {
	kv: Arc<PersistentKv>,
	namespace: Namespace,
}

impl ProofStore {
	pub fn new(kv: Arc<PersistentKv>) -> Self {
		Self { kv, namespace: Namespace::new(PROOFS_NAMESPACE_TAG) }
	}

	/// Writes the proofs for a freshly-committed batch (spec.md §4.E step
	/// 8: `next_start + i` for `i` in `0..N`). Idempotent per-entry: a
	/// proof identical to what's already stored is a no-op; a differing
	/// one is a [`ProofStoreError::Conflict`].
	pub fn add_batch(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
		start_height: u64,
		proofs: &[(MerkleProof, [u8; 32])],
	) -> Result<(), ProofStoreError> {
		for (offset, (proof, pub_rand)) in proofs.iter().enumerate() {
			let height = start_height + offset as u64;
			let key = proof_key(&btc_pk, chain_id, height);
			let record = ProofRecord { proof: proof.clone(), pub_rand: *pub_rand };
			match self.kv.get::<ProofRecord>(self.namespace, &key)? {
				Some(existing) if existing == record => {},
				Some(_) => return Err(ProofStoreError::Conflict),
				None => self.kv.put(self.namespace, &key, &record)?,
			}
		}
		Ok(())
	}

	pub fn get(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
		height: u64,
	) -> Result<Option<(MerkleProof, [u8; 32])>, ProofStoreError> {
		let key = proof_key(&btc_pk, chain_id, height);
		Ok(self.kv.get::<ProofRecord>(self.namespace, &key)?.map(|r| (r.proof, r.pub_rand)))
	}

	/// Returns every `(height, proof, pub_rand)` stored in `[from, to)` for
	/// `(btc_pk, chain_id)`, ordered ascending by height.
	pub fn get_range(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
		from: u64,
		to: u64,
	) -> Result<Vec<(u64, MerkleProof, [u8; 32])>, ProofStoreError> {
		let mut out = Vec::new();
		for height in from..to {
			if let Some((proof, pub_rand)) = self.get(btc_pk, chain_id, height)? {
				out.push((height, proof, pub_rand));
			}
		}
		Ok(out)
	}
}

/// Single-record-per-`btc_pk` store for [`FinalityProviderRecord`]
/// (spec.md §4.D). `update_last_voted_height` is the one mutation allowed
/// after registration, and only strictly forward (I3).
pub struct FinalityProviderStore {
	kv: Arc<PersistentKv>,
	namespace: Namespace,
}

impl FinalityProviderStore {
	pub fn new(kv: Arc<PersistentKv>) -> Self {
		Self { kv, namespace: Namespace::new(FPS_NAMESPACE_TAG) }
	}

	fn key(btc_pk: &XOnlyPublicKey) -> Vec<u8> {
		btc_pk.serialize().to_vec()
	}

	/// Registers a provider record. Returns the existing record unchanged
	/// if one is already present for this `btc_pk` (registration is
	/// idempotent, not an error — the provider may simply be restarting).
	pub fn register(
		&self,
		record: FinalityProviderRecord,
	) -> Result<FinalityProviderRecord, StoreError> {
		let key = Self::key(&record.btc_pk);
		if let Some(existing) = self.kv.get::<FinalityProviderRecord>(self.namespace, &key)? {
			return Ok(existing);
		}
		self.kv.put(self.namespace, &key, &record)?;
		Ok(record)
	}

	pub fn get(&self, btc_pk: XOnlyPublicKey) -> Result<Option<FinalityProviderRecord>, StoreError> {
		self.kv.get(self.namespace, &Self::key(&btc_pk))
	}

	/// Every registered provider record, in no particular order beyond the
	/// key-byte ordering `scan_prefix` already gives for free. Used at
	/// startup to discover which keys to unlock and which control loops to
	/// spawn, rather than requiring the operator to list `btc_pk`s by hand.
	pub fn list_all(&self) -> Result<Vec<FinalityProviderRecord>, StoreError> {
		self.kv
			.scan_prefix::<FinalityProviderRecord>(self.namespace)
			.map(|r| r.map(|(_suffix, record)| record))
			.collect()
	}

	/// Accepts `height` only if it is strictly greater than the currently
	/// stored `last_voted_height` (I3). Returns `Ok(false)` without writing
	/// if `height` is not an advance — this is the normal outcome of a
	/// replayed/idempotent submission (spec.md P5), not an error.
	pub fn update_last_voted_height(
		&self,
		btc_pk: XOnlyPublicKey,
		height: u64,
	) -> Result<bool, AgentError> {
		let key = Self::key(&btc_pk);
		let mut record = self
			.kv
			.get::<FinalityProviderRecord>(self.namespace, &key)
			.map_err(|e| AgentError::Corruption(e.to_string()))?
			.ok_or_else(|| AgentError::DataMissing {
				btc_pk,
				chain_id: String::new(),
				height,
				what: "finality provider record",
			})?;

		if !record.try_update_last_voted_height(height) {
			return Ok(false);
		}

		self.kv
			.put(self.namespace, &key, &record)
			.map_err(|e| AgentError::Corruption(e.to_string()))?;
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_pk() -> XOnlyPublicKey {
		let sk = secp256k1::SecretKey::from_slice(&[6u8; 32]).unwrap();
		secp256k1::Keypair::from_secret_key(secp256k1::SECP256K1, &sk).x_only_public_key().0
	}

	fn open_kv() -> (tempfile::TempDir, Arc<PersistentKv>) {
		let dir = tempfile::tempdir().unwrap();
		let kv = Arc::new(PersistentKv::open_and_migrate(&dir.path().join("db")).unwrap());
		(dir, kv)
	}

	fn record(btc_pk: XOnlyPublicKey) -> FinalityProviderRecord {
		FinalityProviderRecord {
			btc_pk,
			addr: "addr1".into(),
			chain_id: "chain-a".into(),
			description: "a provider".into(),
			commission_bps: 100,
			last_voted_height: 0,
		}
	}

	#[test]
	fn register_is_idempotent_and_keeps_the_first_record() {
		let (_dir, kv) = open_kv();
		let store = FinalityProviderStore::new(kv);
		let pk = test_pk();
		let first = store.register(record(pk)).unwrap();
		let mut second_attempt = record(pk);
		second_attempt.commission_bps = 999;
		let second = store.register(second_attempt).unwrap();
		assert_eq!(first, second);
		assert_eq!(store.get(pk).unwrap().unwrap().commission_bps, 100);
	}

	#[test]
	fn last_voted_height_only_advances() {
		let (_dir, kv) = open_kv();
		let store = FinalityProviderStore::new(kv);
		let pk = test_pk();
		store.register(record(pk)).unwrap();

		assert!(store.update_last_voted_height(pk, 10).unwrap());
		assert!(!store.update_last_voted_height(pk, 10).unwrap());
		assert!(!store.update_last_voted_height(pk, 5).unwrap());
		assert!(store.update_last_voted_height(pk, 11).unwrap());
		assert_eq!(store.get(pk).unwrap().unwrap().last_voted_height, 11);
	}

	#[test]
	fn list_all_returns_every_registered_provider() {
		let (_dir, kv) = open_kv();
		let store = FinalityProviderStore::new(kv);
		let pk_a = test_pk();
		let sk_b = secp256k1::SecretKey::from_slice(&[9u8; 32]).unwrap();
		let pk_b = secp256k1::Keypair::from_secret_key(secp256k1::SECP256K1, &sk_b).x_only_public_key().0;
		store.register(record(pk_a)).unwrap();
		store.register(record(pk_b)).unwrap();

		let all = store.list_all().unwrap();
		assert_eq!(all.len(), 2);
		assert!(all.iter().any(|r| r.btc_pk == pk_a));
		assert!(all.iter().any(|r| r.btc_pk == pk_b));
	}

	#[test]
	fn update_on_unregistered_provider_is_data_missing() {
		let (_dir, kv) = open_kv();
		let store = FinalityProviderStore::new(kv);
		assert!(matches!(
			store.update_last_voted_height(test_pk(), 1),
			Err(AgentError::DataMissing { .. })
		));
	}

	#[test]
	fn proof_store_add_then_get_roundtrips() {
		let (_dir, kv) = open_kv();
		let store = ProofStore::new(kv);
		let pk = test_pk();
		let proof = MerkleProof::default();
		store.add_batch(pk, "chain-a", 100, &[(proof.clone(), [1u8; 32]), (proof.clone(), [2u8; 32])]).unwrap();

		assert_eq!(store.get(pk, "chain-a", 100).unwrap(), Some((proof.clone(), [1u8; 32])));
		assert_eq!(store.get(pk, "chain-a", 101).unwrap(), Some((proof, [2u8; 32])));
		assert_eq!(store.get(pk, "chain-a", 102).unwrap(), None);
	}

	#[test]
	fn proof_store_rejects_conflicting_rewrite() {
		let (_dir, kv) = open_kv();
		let store = ProofStore::new(kv);
		let pk = test_pk();
		let proof = MerkleProof::default();
		store.add_batch(pk, "chain-a", 100, &[(proof.clone(), [1u8; 32])]).unwrap();
		assert!(matches!(
			store.add_batch(pk, "chain-a", 100, &[(proof, [9u8; 32])]),
			Err(ProofStoreError::Conflict)
		));
	}

	#[test]
	fn proof_store_get_range_skips_missing_heights() {
		let (_dir, kv) = open_kv();
		let store = ProofStore::new(kv);
		let pk = test_pk();
		let proof = MerkleProof::default();
		store.add_batch(pk, "chain-a", 100, &[(proof.clone(), [1u8; 32])]).unwrap();
		store.add_batch(pk, "chain-a", 102, &[(proof, [3u8; 32])]).unwrap();

		let range = store.get_range(pk, "chain-a", 100, 103).unwrap();
		assert_eq!(range.len(), 2);
		assert_eq!(range[0].0, 100);
		assert_eq!(range[1].0, 102);
	}
}
