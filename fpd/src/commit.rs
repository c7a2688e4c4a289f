//! Public-randomness commitment pipeline (spec.md §4.E).
//!
//! Checks whether the provider's committed-randomness runway is running
//! low, and if so derives a fresh batch of nonces, commits their Merkle
//! root on-chain, and persists the inclusion proofs the vote pipeline will
//! need later.

use secp256k1::XOnlyPublicKey;

use fp_chain_client::{ChainClientError, ConsumerChainClient, PubRandCommitRequest};
use fp_eots::EotsManager;
use fp_primitives::{merkle::MerkleTree, tagged_hash::tagged_hash, AgentError, PubRandCommit};

use crate::provider_store::ProofStore;

const COMMITMENT_CHALLENGE_TAG: &[u8] = b"EOTS/commitment";

/// Batch size and safety-margin knobs for [`maybe_commit`] (spec.md §4.E).
#[derive(Debug, Clone, Copy)]
pub struct CommitConfig {
	/// `N`: number of public-randomness values committed per batch.
	pub num_pub_rand: u32,
	/// `T`: conservative safety margin, in blocks, subtracted from the
	/// runway check so a commit lands well before the chain catches up to
	/// the end of the previous batch.
	pub timestamping_delay: u64,
	/// Minimum remaining randomness (in blocks) before a new commit is
	/// triggered.
	pub min_randomness_before_exhaustion: u64,
}

/// Domain-separated digest committed to by the commitment's own Schnorr
/// signature (spec.md §4.E step 6): `H(chain_id || next_start || N || root)`.
fn commitment_digest(chain_id: &str, next_start: u64, num_pub_rand: u32, root: &[u8; 32]) -> [u8; 32] {
	tagged_hash(
		COMMITMENT_CHALLENGE_TAG,
		&[chain_id.as_bytes(), &next_start.to_be_bytes(), &num_pub_rand.to_be_bytes(), root],
	)
}

/// Runs one iteration of the commit pipeline for `btc_pk` on `chain_id`.
///
/// Returns `Ok(Some(commit))` if a new commitment was submitted, `Ok(None)`
/// if the existing runway was judged sufficient (spec.md §4.E step 2's
/// no-op branch).
pub async fn maybe_commit(
	chain: &dyn ConsumerChainClient,
	eots: &EotsManager,
	proofs: &ProofStore,
	btc_pk: XOnlyPublicKey,
	chain_id: &str,
	cfg: CommitConfig,
) -> Result<Option<PubRandCommit>, AgentError> {
	let tip_height = chain.query_latest_block_height().await?;
	let activation_height = chain.query_finality_activation_block_height().await?;

	let last_end = match chain.query_last_public_rand_commit(btc_pk, chain_id).await? {
		Some(commit) => commit.end_height(),
		None => activation_height,
	};

	// Step 2: sufficient runway remains, no-op.
	if tip_height + cfg.timestamping_delay + cfg.min_randomness_before_exhaustion < last_end {
		return Ok(None);
	}

	let next_start = last_end;

	// Step 4.
	let publics = eots.derive_pub_rand_list(btc_pk, chain_id, next_start, cfg.num_pub_rand as u64)?;

	// Step 5: Merkle commitment over the public nonces.
	let tree = MerkleTree::build(&publics);
	let root = tree.root();

	// Step 6: sign the commitment itself.
	let digest = commitment_digest(chain_id, next_start, cfg.num_pub_rand, &root);
	let signature = eots.sign_schnorr(btc_pk, digest)?;

	// Step 7: submit, tolerating an idempotent-conflict as success (the
	// chain already recorded an equal-or-greater commit — spec.md §4.E
	// failure policy).
	let request = PubRandCommitRequest {
		btc_pk,
		chain_id: chain_id.to_string(),
		start_height: next_start,
		num_pub_rand: cfg.num_pub_rand,
		commitment: root,
		signature: signature.to_bytes(),
	};
	match chain.commit_pub_rand_list(request).await {
		Ok(_) => {},
		Err(ChainClientError::IdempotentConflict) => {
			crate::metrics::COMMITS_SUBMITTED.with_label_values(&[&btc_pk.to_string(), chain_id]).inc();
			return Ok(Some(PubRandCommit { start_height: next_start, num_pub_rand: cfg.num_pub_rand, commitment: root }))
		},
		Err(e) => return Err(e.into()),
	}
	crate::metrics::COMMITS_SUBMITTED.with_label_values(&[&btc_pk.to_string(), chain_id]).inc();

	// Step 8: persist inclusion proofs for every height in the batch.
	let batch: Vec<_> = publics.iter().enumerate().map(|(i, pub_rand)| (tree.proof(i), *pub_rand)).collect();
	proofs
		.add_batch(btc_pk, chain_id, next_start, &batch)
		.map_err(|e| e.into_agent_error(btc_pk, chain_id.to_string(), next_start))?;

	Ok(Some(PubRandCommit { start_height: next_start, num_pub_rand: cfg.num_pub_rand, commitment: root }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use fp_chain_client::fake::FakeChainClient;
	use fp_eots::MasterSecret;
	use std::sync::Arc;

	fn open_manager() -> (tempfile::TempDir, EotsManager, XOnlyPublicKey) {
		let dir = tempfile::tempdir().unwrap();
		let kv = Arc::new(fp_store::PersistentKv::open_and_migrate(&dir.path().join("db")).unwrap());
		let master = MasterSecret::from_seed(vec![7u8; 32], bitcoin::Network::Bitcoin).unwrap();
		let manager = EotsManager::new(kv, master);
		let pk = manager.create_key("fp-1", "pw", "m/0'/0'/0'").unwrap();
		(dir, manager, pk)
	}

	fn cfg() -> CommitConfig {
		CommitConfig { num_pub_rand: 1000, timestamping_delay: 200, min_randomness_before_exhaustion: 100 }
	}

	#[tokio::test]
	async fn seed_scenario_3_runway_check() {
		let (dir, manager, pk) = open_manager();
		let tmp = tempfile::tempdir().unwrap();
		let kv = Arc::new(fp_store::PersistentKv::open_and_migrate(&tmp.path().join("proofs")).unwrap());
		let proofs = ProofStore::new(kv);
		let fake = FakeChainClient::new();
		fake.set_finality_activation_height(1);

		// Pre-seed an existing commit {start=200, N=1000}.
		let req = PubRandCommitRequest {
			btc_pk: pk,
			chain_id: "chain-a".into(),
			start_height: 200,
			num_pub_rand: 1000,
			commitment: [0u8; 32],
			signature: [0u8; 64],
		};
		fake.commit_pub_rand_list(req).await.unwrap();

		// tip=900, T=200, min_runway=100: last_end=1200, 900+200+100=1200, not < 1200 => triggers.
		// tip=899 would be sufficient runway (899+300=1199 < 1200). Use 890 for clarity.
		fake.advance_chain(fp_primitives::BlockInfo::new(890, [0u8; 32]));
		let result = maybe_commit(&fake, &manager, &proofs, pk, "chain-a", cfg()).await.unwrap();
		assert!(result.is_none(), "sufficient runway should be a no-op");

		fake.advance_chain(fp_primitives::BlockInfo::new(950, [0u8; 32]));
		let result = maybe_commit(&fake, &manager, &proofs, pk, "chain-a", cfg()).await.unwrap().unwrap();
		assert_eq!(result.start_height, 1200);
		assert_eq!(result.num_pub_rand, 1000);

		// Proofs for the new range got persisted.
		assert!(proofs.get(pk, "chain-a", 1200).unwrap().is_some());
		assert!(proofs.get(pk, "chain-a", 2199).unwrap().is_some());
		assert!(proofs.get(pk, "chain-a", 2200).unwrap().is_none());

		drop(dir);
	}

	#[tokio::test]
	async fn commits_never_overlap_across_successive_batches() {
		let (_dir, manager, pk) = open_manager();
		let tmp = tempfile::tempdir().unwrap();
		let kv = Arc::new(fp_store::PersistentKv::open_and_migrate(&tmp.path().join("proofs")).unwrap());
		let proofs = ProofStore::new(kv);
		let fake = FakeChainClient::new();
		fake.set_finality_activation_height(100);

		let small_cfg =
			CommitConfig { num_pub_rand: 10, timestamping_delay: 0, min_randomness_before_exhaustion: 0 };

		fake.advance_chain(fp_primitives::BlockInfo::new(100, [0u8; 32]));
		let first = maybe_commit(&fake, &manager, &proofs, pk, "chain-a", small_cfg).await.unwrap().unwrap();
		assert_eq!(first.start_height, 100);

		fake.advance_chain(fp_primitives::BlockInfo::new(110, [0u8; 32]));
		let second = maybe_commit(&fake, &manager, &proofs, pk, "chain-a", small_cfg).await.unwrap().unwrap();
		assert_eq!(second.start_height, first.start_height + first.num_pub_rand as u64);
	}
}
