//! RPC surfaces the agent needs from the consumer chain and from the
//! Babylon control plane (spec.md §4.E/§4.F/§6), plus the retry wrapper
//! every production client is driven through.
//!
//! Implementations are consumed behind `Arc<dyn ConsumerChainClient>` /
//! `Arc<dyn BabylonClient>` so the pipeline code in `fpd` never depends on
//! a concrete transport: production wiring uses [`jsonrpc::JsonRpcClient`]
//! wrapped in [`retry::RetryingClient`]; tests use [`fake::FakeChainClient`].

pub mod error;
pub mod fake;
pub mod jsonrpc;
pub mod retry;

pub use error::ChainClientError;

use async_trait::async_trait;
use secp256k1::XOnlyPublicKey;

use fp_primitives::{BlockInfo, PubRandCommit, TxResponse};

/// One leaf of a public-randomness commitment batch, as submitted on-chain.
#[derive(Debug, Clone)]
pub struct PubRandCommitRequest {
	pub btc_pk: XOnlyPublicKey,
	pub chain_id: String,
	pub start_height: u64,
	pub num_pub_rand: u32,
	pub commitment: [u8; 32],
	/// BIP-340 Schnorr signature over the commitment, proving the committer
	/// holds `btc_pk`.
	pub signature: [u8; 64],
}

/// One finality vote ready for batch submission.
#[derive(Debug, Clone)]
pub struct FinalitySigSubmission {
	pub btc_pk: XOnlyPublicKey,
	pub chain_id: String,
	pub height: u64,
	pub block_hash: [u8; 32],
	pub pub_rand: [u8; 32],
	/// Merkle inclusion proof tying `pub_rand` back to the commitment
	/// covering `height`.
	pub proof: fp_primitives::merkle::MerkleProof,
	pub eots_signature: [u8; 64],
}

/// Everything the agent needs to read from, and submit votes/commitments
/// to, the consumer chain (spec.md §4.E/§4.F/§6).
#[async_trait]
pub trait ConsumerChainClient: Send + Sync {
	async fn query_finality_activation_block_height(&self) -> Result<u64, ChainClientError>;

	async fn query_latest_finalized_block(&self) -> Result<BlockInfo, ChainClientError>;

	async fn query_latest_block_height(&self) -> Result<u64, ChainClientError>;

	async fn query_finality_provider_has_power(
		&self,
		btc_pk: XOnlyPublicKey,
		height: u64,
	) -> Result<bool, ChainClientError>;

	async fn query_finality_provider_highest_voted_height(
		&self,
		btc_pk: XOnlyPublicKey,
	) -> Result<u64, ChainClientError>;

	async fn query_last_public_rand_commit(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
	) -> Result<Option<PubRandCommit>, ChainClientError>;

	async fn commit_pub_rand_list(
		&self,
		request: PubRandCommitRequest,
	) -> Result<TxResponse, ChainClientError>;

	async fn submit_batch_finality_sigs(
		&self,
		submissions: Vec<FinalitySigSubmission>,
	) -> Result<TxResponse, ChainClientError>;
}

/// Registration and account-management calls against the Babylon control
/// plane (spec.md §4.D/§6). Kept as a separate trait from
/// [`ConsumerChainClient`] because a deployment may point the two at
/// different endpoints.
#[async_trait]
pub trait BabylonClient: Send + Sync {
	async fn register_finality_provider(
		&self,
		btc_pk: XOnlyPublicKey,
		addr: &str,
		chain_id: &str,
		description: &str,
		commission_bps: u16,
	) -> Result<TxResponse, ChainClientError>;

	async fn update_commission_and_description(
		&self,
		btc_pk: XOnlyPublicKey,
		commission_bps: u16,
		description: &str,
	) -> Result<TxResponse, ChainClientError>;

	async fn query_balance(&self, addr: &str) -> Result<u128, ChainClientError>;
}
