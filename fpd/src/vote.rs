//! Vote pipeline (spec.md §4.F): turns a batch of finalizable blocks into
//! EOTS signatures and submits them as one batch.
//!
//! Precondition checks run per-block, in the exact order spec.md specifies
//! (height-already-voted, then voting-power, then randomness-committed) so
//! that a block failing an earlier check is never charged for a later,
//! more expensive one (an RPC query).

use secp256k1::XOnlyPublicKey;

use fp_chain_client::{ChainClientError, ConsumerChainClient, FinalitySigSubmission};
use fp_eots::EotsManager;
use fp_primitives::{AgentError, BlockInfo, PubRandCommit};

use crate::provider_store::{FinalityProviderStore, ProofStore};

/// Why a candidate block was left out of this round's batch. None of these
/// are errors: each is the expected outcome of a precondition that can
/// legitimately fail for a given block (spec.md §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	AlreadyVoted,
	NoVotingPower,
	RandomnessNotCommitted,
}

/// Outcome of preparing one block for the batch.
pub enum PreparedVote {
	Ready(FinalitySigSubmission),
	Skipped { height: u64, reason: SkipReason },
	/// `sign_eots` refused the vote as an equivocation attempt: dropped
	/// from the batch, never retried, logged at the highest severity
	/// (spec.md §4.F).
	Equivocation { height: u64 },
}

/// Prepares votes for every block in `blocks` against the current
/// `last_voted_height`/`commit`, without submitting anything. Blocks must
/// already be in ascending height order (the external poller's contract,
/// spec.md §9).
pub async fn prepare_batch(
	chain: &dyn ConsumerChainClient,
	eots: &EotsManager,
	proofs: &ProofStore,
	btc_pk: XOnlyPublicKey,
	chain_id: &str,
	last_voted_height: u64,
	commit: Option<&PubRandCommit>,
	blocks: &[BlockInfo],
) -> Result<Vec<PreparedVote>, AgentError> {
	let mut out = Vec::with_capacity(blocks.len());

	for block in blocks {
		if block.height <= last_voted_height {
			out.push(PreparedVote::Skipped { height: block.height, reason: SkipReason::AlreadyVoted });
			continue;
		}

		if !chain.query_finality_provider_has_power(btc_pk, block.height).await? {
			out.push(PreparedVote::Skipped { height: block.height, reason: SkipReason::NoVotingPower });
			continue;
		}

		let in_range = commit.is_some_and(|c| c.covers(block.height));
		if !in_range {
			out.push(PreparedVote::Skipped {
				height: block.height,
				reason: SkipReason::RandomnessNotCommitted,
			});
			continue;
		}

		let (proof, pub_rand) = proofs
			.get(btc_pk, chain_id, block.height)
			.map_err(|e| e.into_agent_error(btc_pk, chain_id.to_string(), block.height))?
			.ok_or(AgentError::DataMissing {
				btc_pk,
				chain_id: chain_id.to_string(),
				height: block.height,
				what: "merkle inclusion proof",
			})?;

		let digest = fp_eots::digest::finality_vote_digest(block.height, &block.hash);
		match eots.sign_eots(btc_pk, chain_id, block.height, digest) {
			Ok(signature) => {
				crate::metrics::SIGNATURES_PRODUCED.with_label_values(&[&btc_pk.to_string()]).inc();
				out.push(PreparedVote::Ready(FinalitySigSubmission {
					btc_pk,
					chain_id: chain_id.to_string(),
					height: block.height,
					block_hash: block.hash,
					pub_rand,
					proof,
					eots_signature: signature.to_bytes(),
				}))
			},
			Err(AgentError::EquivocationAttempt { .. }) => {
				crate::metrics::EQUIVOCATION_ATTEMPTS_REFUSED.with_label_values(&[&btc_pk.to_string()]).inc();
				out.push(PreparedVote::Equivocation { height: block.height })
			},
			Err(e) => return Err(e),
		}
	}

	Ok(out)
}

/// Submits every [`PreparedVote::Ready`] item in `prepared` as one batch
/// and, on success, advances `last_voted_height` to the maximum submitted
/// height (spec.md §4.F). Returns `Ok(None)` if there was nothing to
/// submit (every candidate was skipped or equivocated).
pub async fn submit_batch(
	chain: &dyn ConsumerChainClient,
	fps: &FinalityProviderStore,
	btc_pk: XOnlyPublicKey,
	prepared: &[PreparedVote],
) -> Result<Option<u64>, AgentError> {
	let ready: Vec<FinalitySigSubmission> = prepared
		.iter()
		.filter_map(|p| match p {
			PreparedVote::Ready(s) => Some(s.clone()),
			_ => None,
		})
		.collect();

	if ready.is_empty() {
		return Ok(None);
	}

	let max_height = ready.iter().map(|s| s.height).max().expect("checked non-empty above");
	let chain_id = ready[0].chain_id.clone();

	match chain.submit_batch_finality_sigs(ready).await {
		Ok(_) | Err(ChainClientError::IdempotentConflict) => {},
		Err(e) => return Err(e.into()),
	}
	crate::metrics::VOTES_SUBMITTED.with_label_values(&[&btc_pk.to_string(), &chain_id]).inc();

	fps.update_last_voted_height(btc_pk, max_height)?;
	Ok(Some(max_height))
}

#[cfg(test)]
mod tests {
	use super::*;
	use fp_chain_client::fake::FakeChainClient;
	use fp_eots::MasterSecret;
	use fp_primitives::FinalityProviderRecord;
	use std::sync::Arc;

	fn setup() -> (tempfile::TempDir, EotsManager, ProofStore, FinalityProviderStore, XOnlyPublicKey) {
		let dir = tempfile::tempdir().unwrap();
		let kv = Arc::new(fp_store::PersistentKv::open_and_migrate(&dir.path().join("db")).unwrap());
		let master = MasterSecret::from_seed(vec![9u8; 32], bitcoin::Network::Bitcoin).unwrap();
		let manager = EotsManager::new(kv.clone(), master);
		let pk = manager.create_key("fp-1", "pw", "m/0'/0'/5'").unwrap();

		let proofs = ProofStore::new(kv.clone());
		let fps = FinalityProviderStore::new(kv);
		fps.register(FinalityProviderRecord {
			btc_pk: pk,
			addr: "addr".into(),
			chain_id: "chain-a".into(),
			description: "".into(),
			commission_bps: 0,
			last_voted_height: 0,
		})
		.unwrap();

		(dir, manager, proofs, fps, pk)
	}

	fn seed_proofs(manager: &EotsManager, proofs: &ProofStore, pk: XOnlyPublicKey, start: u64, n: u64) {
		let publics = manager.derive_pub_rand_list(pk, "chain-a", start, n).unwrap();
		let tree = fp_primitives::merkle::MerkleTree::build(&publics);
		let batch: Vec<_> = publics.iter().enumerate().map(|(i, p)| (tree.proof(i), *p)).collect();
		proofs.add_batch(pk, "chain-a", start, &batch).unwrap();
	}

	#[tokio::test]
	async fn seed_scenario_4_votes_and_advances_last_voted_height() {
		let (_dir, manager, proofs, fps, pk) = setup();
		seed_proofs(&manager, &proofs, pk, 1200, 1000);
		fps.update_last_voted_height(pk, 1204).unwrap();

		let fake = FakeChainClient::new();
		let commit = PubRandCommit { start_height: 1200, num_pub_rand: 1000, commitment: [0u8; 32] };
		let blocks = vec![BlockInfo::new(1205, [7u8; 32])];

		let prepared = prepare_batch(&fake, &manager, &proofs, pk, "chain-a", 1204, Some(&commit), &blocks)
			.await
			.unwrap();
		assert!(matches!(prepared[0], PreparedVote::Ready(_)));

		let result = submit_batch(&fake, &fps, pk, &prepared).await.unwrap();
		assert_eq!(result, Some(1205));
		assert_eq!(fps.get(pk).unwrap().unwrap().last_voted_height, 1205);
	}

	#[tokio::test]
	async fn boundary_height_at_exact_end_of_range_is_refused() {
		let (_dir, manager, proofs, _fps, pk) = setup();
		seed_proofs(&manager, &proofs, pk, 1200, 1000);

		let fake = FakeChainClient::new();
		let commit = PubRandCommit { start_height: 1200, num_pub_rand: 1000, commitment: [0u8; 32] };

		// height = start + N - 1: signable.
		let last_in_range = vec![BlockInfo::new(2199, [1u8; 32])];
		let prepared =
			prepare_batch(&fake, &manager, &proofs, pk, "chain-a", 0, Some(&commit), &last_in_range)
				.await
				.unwrap();
		assert!(matches!(prepared[0], PreparedVote::Ready(_)));

		// height = start + N: refused, randomness exhausted.
		let exhausted = vec![BlockInfo::new(2200, [1u8; 32])];
		let prepared =
			prepare_batch(&fake, &manager, &proofs, pk, "chain-a", 0, Some(&commit), &exhausted)
				.await
				.unwrap();
		assert!(matches!(
			prepared[0],
			PreparedVote::Skipped { reason: SkipReason::RandomnessNotCommitted, .. }
		));
	}

	#[tokio::test]
	async fn already_voted_height_is_skipped_before_any_rpc_check() {
		let (_dir, manager, proofs, _fps, pk) = setup();
		let fake = FakeChainClient::new();
		let commit = PubRandCommit { start_height: 1200, num_pub_rand: 1000, commitment: [0u8; 32] };
		let blocks = vec![BlockInfo::new(100, [0u8; 32])];
		let prepared =
			prepare_batch(&fake, &manager, &proofs, pk, "chain-a", 500, Some(&commit), &blocks)
				.await
				.unwrap();
		assert!(matches!(
			prepared[0],
			PreparedVote::Skipped { reason: SkipReason::AlreadyVoted, .. }
		));
	}

	#[tokio::test]
	async fn no_voting_power_is_skipped() {
		let (_dir, manager, proofs, _fps, pk) = setup();
		seed_proofs(&manager, &proofs, pk, 1200, 1000);
		let fake = FakeChainClient::new();
		fake.set_provider_power(pk, 1205, false);
		let commit = PubRandCommit { start_height: 1200, num_pub_rand: 1000, commitment: [0u8; 32] };
		let blocks = vec![BlockInfo::new(1205, [0u8; 32])];
		let prepared =
			prepare_batch(&fake, &manager, &proofs, pk, "chain-a", 0, Some(&commit), &blocks)
				.await
				.unwrap();
		assert!(matches!(
			prepared[0],
			PreparedVote::Skipped { reason: SkipReason::NoVotingPower, .. }
		));
	}

	#[tokio::test]
	async fn seed_scenario_5_second_sign_eots_with_different_digest_is_equivocation() {
		let (_dir, manager, proofs, fps, pk) = setup();
		seed_proofs(&manager, &proofs, pk, 1200, 1000);
		let fake = FakeChainClient::new();
		let commit = PubRandCommit { start_height: 1200, num_pub_rand: 1000, commitment: [0u8; 32] };

		let block = BlockInfo::new(1205, [7u8; 32]);
		let prepared =
			prepare_batch(&fake, &manager, &proofs, pk, "chain-a", 0, Some(&commit), &[block]).await.unwrap();
		submit_batch(&fake, &fps, pk, &prepared).await.unwrap();

		// A second, different message at the same height.
		let different_block = BlockInfo::new(1205, [8u8; 32]);
		let prepared2 = prepare_batch(
			&fake,
			&manager,
			&proofs,
			pk,
			"chain-a",
			0, // last_voted_height is a local cache; here we force the precondition past.
			Some(&commit),
			&[different_block],
		)
		.await
		.unwrap();
		assert!(matches!(prepared2[0], PreparedVote::Equivocation { height: 1205 }));
	}
}
