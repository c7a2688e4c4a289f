//! An in-memory fake consumer chain, used by `fpd`'s pipeline tests.
//!
//! Grounded on `engine/src/db/persistent.rs`'s test modules' style of a
//! hand-written fake with its own advancing state, per SPEC_FULL.md §9: a
//! hand-written fake is preferred over a `mockall` mock here because the
//! behavior under test (reorgs, idempotent resubmission, provider power
//! toggling) is the fake's own evolving state machine, not a fixed sequence
//! of call/response expectations.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use secp256k1::XOnlyPublicKey;

use fp_primitives::{BlockInfo, PubRandCommit, TxResponse};

use crate::{
	BabylonClient, ChainClientError, ConsumerChainClient, FinalitySigSubmission, PubRandCommitRequest,
};

#[derive(Default)]
struct State {
	finality_activation_height: u64,
	latest_finalized: Option<BlockInfo>,
	latest_height: u64,
	/// `(btc_pk, height) -> has_power`, defaulting to `true` when absent.
	power: HashMap<(XOnlyPublicKey, u64), bool>,
	highest_voted: HashMap<XOnlyPublicKey, u64>,
	commits: HashMap<(XOnlyPublicKey, String), PubRandCommit>,
	submitted_sigs: Vec<FinalitySigSubmission>,
	registered: HashMap<XOnlyPublicKey, (String, String, String, u16)>,
	balances: HashMap<String, u128>,
	next_tx_id: u64,
}

/// An in-memory fake implementing both [`ConsumerChainClient`] and
/// [`BabylonClient`], advanced explicitly by test code via the `set_*` /
/// `advance_*` helpers rather than by wall-clock time.
pub struct FakeChainClient {
	state: Mutex<State>,
}

impl FakeChainClient {
	pub fn new() -> Self {
		Self { state: Mutex::new(State::default()) }
	}

	pub fn set_finality_activation_height(&self, height: u64) {
		self.state.lock().unwrap().finality_activation_height = height;
	}

	pub fn advance_chain(&self, block: BlockInfo) {
		let mut state = self.state.lock().unwrap();
		state.latest_height = block.height;
		state.latest_finalized = Some(block);
	}

	pub fn set_provider_power(&self, btc_pk: XOnlyPublicKey, height: u64, has_power: bool) {
		self.state.lock().unwrap().power.insert((btc_pk, height), has_power);
	}

	pub fn submitted_sigs(&self) -> Vec<FinalitySigSubmission> {
		self.state.lock().unwrap().submitted_sigs.clone()
	}

	fn next_tx_hash(state: &mut State) -> String {
		state.next_tx_id += 1;
		format!("fake-tx-{}", state.next_tx_id)
	}
}

impl Default for FakeChainClient {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl ConsumerChainClient for FakeChainClient {
	async fn query_finality_activation_block_height(&self) -> Result<u64, ChainClientError> {
		Ok(self.state.lock().unwrap().finality_activation_height)
	}

	async fn query_latest_finalized_block(&self) -> Result<BlockInfo, ChainClientError> {
		self.state
			.lock()
			.unwrap()
			.latest_finalized
			.ok_or_else(|| ChainClientError::Rejected("no finalized block yet".into()))
	}

	async fn query_latest_block_height(&self) -> Result<u64, ChainClientError> {
		Ok(self.state.lock().unwrap().latest_height)
	}

	async fn query_finality_provider_has_power(
		&self,
		btc_pk: XOnlyPublicKey,
		height: u64,
	) -> Result<bool, ChainClientError> {
		Ok(*self.state.lock().unwrap().power.get(&(btc_pk, height)).unwrap_or(&true))
	}

	async fn query_finality_provider_highest_voted_height(
		&self,
		btc_pk: XOnlyPublicKey,
	) -> Result<u64, ChainClientError> {
		Ok(*self.state.lock().unwrap().highest_voted.get(&btc_pk).unwrap_or(&0))
	}

	async fn query_last_public_rand_commit(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
	) -> Result<Option<PubRandCommit>, ChainClientError> {
		Ok(self.state.lock().unwrap().commits.get(&(btc_pk, chain_id.to_string())).copied())
	}

	async fn commit_pub_rand_list(
		&self,
		request: PubRandCommitRequest,
	) -> Result<TxResponse, ChainClientError> {
		let mut state = self.state.lock().unwrap();
		let key = (request.btc_pk, request.chain_id.clone());
		if let Some(existing) = state.commits.get(&key) {
			if existing.start_height >= request.start_height
				&& existing.end_height() >= request.start_height + request.num_pub_rand as u64
			{
				return Err(ChainClientError::IdempotentConflict);
			}
		}
		state.commits.insert(
			key,
			PubRandCommit {
				start_height: request.start_height,
				num_pub_rand: request.num_pub_rand,
				commitment: request.commitment,
			},
		);
		let tx_hash = Self::next_tx_hash(&mut state);
		Ok(TxResponse { tx_hash, height: Some(state.latest_height) })
	}

	async fn submit_batch_finality_sigs(
		&self,
		submissions: Vec<FinalitySigSubmission>,
	) -> Result<TxResponse, ChainClientError> {
		let mut state = self.state.lock().unwrap();
		for submission in &submissions {
			let current = state.highest_voted.entry(submission.btc_pk).or_insert(0);
			if submission.height <= *current {
				return Err(ChainClientError::IdempotentConflict);
			}
			*current = submission.height;
		}
		state.submitted_sigs.extend(submissions);
		let tx_hash = Self::next_tx_hash(&mut state);
		Ok(TxResponse { tx_hash, height: Some(state.latest_height) })
	}
}

#[async_trait]
impl BabylonClient for FakeChainClient {
	async fn register_finality_provider(
		&self,
		btc_pk: XOnlyPublicKey,
		addr: &str,
		chain_id: &str,
		description: &str,
		commission_bps: u16,
	) -> Result<TxResponse, ChainClientError> {
		let mut state = self.state.lock().unwrap();
		if state.registered.contains_key(&btc_pk) {
			return Err(ChainClientError::IdempotentConflict);
		}
		state
			.registered
			.insert(btc_pk, (addr.to_string(), chain_id.to_string(), description.to_string(), commission_bps));
		let tx_hash = Self::next_tx_hash(&mut state);
		Ok(TxResponse { tx_hash, height: Some(state.latest_height) })
	}

	async fn update_commission_and_description(
		&self,
		btc_pk: XOnlyPublicKey,
		commission_bps: u16,
		description: &str,
	) -> Result<TxResponse, ChainClientError> {
		let mut state = self.state.lock().unwrap();
		let entry = state
			.registered
			.get_mut(&btc_pk)
			.ok_or_else(|| ChainClientError::Rejected("provider not registered".into()))?;
		entry.3 = commission_bps;
		entry.2 = description.to_string();
		let tx_hash = Self::next_tx_hash(&mut state);
		Ok(TxResponse { tx_hash, height: Some(state.latest_height) })
	}

	async fn query_balance(&self, addr: &str) -> Result<u128, ChainClientError> {
		Ok(*self.state.lock().unwrap().balances.get(addr).unwrap_or(&0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_pk() -> XOnlyPublicKey {
		let sk = secp256k1::SecretKey::from_slice(&[4u8; 32]).unwrap();
		secp256k1::Keypair::from_secret_key(secp256k1::SECP256K1, &sk).x_only_public_key().0
	}

	#[tokio::test]
	async fn commit_then_query_roundtrips() {
		let fake = FakeChainClient::new();
		let pk = test_pk();
		fake.commit_pub_rand_list(PubRandCommitRequest {
			btc_pk: pk,
			chain_id: "chain-a".into(),
			start_height: 100,
			num_pub_rand: 50,
			commitment: [1u8; 32],
			signature: [0u8; 64],
		})
		.await
		.unwrap();

		let commit = fake.query_last_public_rand_commit(pk, "chain-a").await.unwrap().unwrap();
		assert_eq!(commit.start_height, 100);
		assert_eq!(commit.num_pub_rand, 50);
	}

	#[tokio::test]
	async fn resubmitting_a_covered_commit_is_idempotent() {
		let fake = FakeChainClient::new();
		let pk = test_pk();
		let req = PubRandCommitRequest {
			btc_pk: pk,
			chain_id: "chain-a".into(),
			start_height: 100,
			num_pub_rand: 50,
			commitment: [1u8; 32],
			signature: [0u8; 64],
		};
		fake.commit_pub_rand_list(req.clone()).await.unwrap();
		assert!(matches!(
			fake.commit_pub_rand_list(req).await,
			Err(ChainClientError::IdempotentConflict)
		));
	}

	#[tokio::test]
	async fn voting_at_or_below_the_highest_height_is_idempotent() {
		let fake = FakeChainClient::new();
		let pk = test_pk();
		let submission = FinalitySigSubmission {
			btc_pk: pk,
			chain_id: "chain-a".into(),
			height: 10,
			block_hash: [0u8; 32],
			pub_rand: [0u8; 32],
			proof: fp_primitives::merkle::MerkleProof::default(),
			eots_signature: [0u8; 64],
		};
		fake.submit_batch_finality_sigs(vec![submission.clone()]).await.unwrap();
		assert!(matches!(
			fake.submit_batch_finality_sigs(vec![submission]).await,
			Err(ChainClientError::IdempotentConflict)
		));
	}
}
