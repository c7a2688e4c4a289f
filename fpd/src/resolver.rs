//! Start-height resolver (spec.md §4.G): chooses the first height a
//! provider's control loop processes on (re)start.
//!
//! `start = max(activation, highest_voted_on_chain + 1, last_finalized + 1,
//! last_voted_local + 1)`. The `max` is what makes restart-after-crash safe
//! (I1/I3/P3): even if the local store's `last_voted_height` lags behind
//! what the chain actually recorded (e.g. a crash between a successful
//! submission and the local update — spec.md §8 scenario 6), the on-chain
//! query catches it.

use secp256k1::XOnlyPublicKey;

use fp_chain_client::ConsumerChainClient;
use fp_primitives::AgentError;

/// Computes the first height to process, per spec.md §4.G.
pub async fn resolve_start_height(
	chain: &dyn ConsumerChainClient,
	btc_pk: XOnlyPublicKey,
	last_voted_height_local: u64,
) -> Result<u64, AgentError> {
	let activation = chain.query_finality_activation_block_height().await?;
	let highest_voted_on_chain = chain.query_finality_provider_highest_voted_height(btc_pk).await?;
	let last_finalized = chain.query_latest_finalized_block().await?.height;

	Ok(activation
		.max(highest_voted_on_chain.saturating_add(1))
		.max(last_finalized.saturating_add(1))
		.max(last_voted_height_local.saturating_add(1)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use fp_chain_client::{fake::FakeChainClient, ConsumerChainClient, FinalitySigSubmission};
	use fp_primitives::{merkle::MerkleProof, BlockInfo};

	fn test_pk() -> XOnlyPublicKey {
		let sk = secp256k1::SecretKey::from_slice(&[2u8; 32]).unwrap();
		secp256k1::Keypair::from_secret_key(secp256k1::SECP256K1, &sk).x_only_public_key().0
	}

	async fn record_a_vote_on_chain(fake: &FakeChainClient, btc_pk: XOnlyPublicKey, height: u64) {
		fake.submit_batch_finality_sigs(vec![FinalitySigSubmission {
			btc_pk,
			chain_id: "chain-a".into(),
			height,
			block_hash: [0u8; 32],
			pub_rand: [0u8; 32],
			proof: MerkleProof::default(),
			eots_signature: [0u8; 64],
		}])
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn seed_scenario_1_fresh_provider() {
		let fake = FakeChainClient::new();
		fake.set_finality_activation_height(100);
		fake.advance_chain(BlockInfo::new(0, [0; 32]));
		let start = resolve_start_height(&fake, test_pk(), 0).await.unwrap();
		assert_eq!(start, 100);
	}

	#[tokio::test]
	async fn seed_scenario_2_restart_with_prior_activity() {
		// activation=100, highest_voted_on_chain=150, last_finalized=140,
		// last_voted_local=120 -> start=151.
		let fake = FakeChainClient::new();
		let pk = test_pk();
		fake.set_finality_activation_height(100);
		fake.advance_chain(BlockInfo::new(140, [0; 32]));
		record_a_vote_on_chain(&fake, pk, 150).await;
		let start = resolve_start_height(&fake, pk, 120).await.unwrap();
		assert_eq!(start, 151);
	}

	#[tokio::test]
	async fn seed_scenario_6_restart_after_crash_right_after_a_vote() {
		// Chain recorded the vote at 1300 but the local store never got to
		// record last_voted=1300 before the crash; the resolver must still
		// not re-offer height <= 1300.
		let fake = FakeChainClient::new();
		let pk = test_pk();
		fake.set_finality_activation_height(1);
		fake.advance_chain(BlockInfo::new(1290, [0; 32]));
		record_a_vote_on_chain(&fake, pk, 1300).await;
		let start = resolve_start_height(&fake, pk, 0).await.unwrap();
		assert_eq!(start, 1301);
	}

	#[tokio::test]
	async fn all_zero_inputs_still_respect_activation_height() {
		let fake = FakeChainClient::new();
		fake.set_finality_activation_height(1);
		fake.advance_chain(BlockInfo::new(0, [0; 32]));
		let start = resolve_start_height(&fake, test_pk(), 0).await.unwrap();
		assert!(start >= 1);
	}
}
