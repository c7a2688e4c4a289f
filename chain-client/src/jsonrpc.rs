//! Thin `jsonrpsee`-backed [`ConsumerChainClient`]/[`BabylonClient`]
//! implementation.
//!
//! Per spec.md §1's Non-goal ("a full consumer-chain RPC client ... is not
//! in scope"), this is deliberately not a complete wire implementation of
//! any particular chain's JSON-RPC surface — it shows the shape production
//! wiring takes (one `jsonrpsee::http_client::HttpClient`, one method per
//! trait method, errors folded into [`ChainClientError`]), grounded on how
//! `jsonrpsee` is already a direct dependency of this workspace for chain
//! RPC plumbing.

use async_trait::async_trait;
use jsonrpsee::{
	core::client::ClientT,
	http_client::{HttpClient, HttpClientBuilder},
	rpc_params,
};
use secp256k1::XOnlyPublicKey;

use fp_primitives::{BlockInfo, PubRandCommit, TxResponse};

use crate::{BabylonClient, ChainClientError, ConsumerChainClient, FinalitySigSubmission, PubRandCommitRequest};

pub struct JsonRpcClient {
	http: HttpClient,
}

impl JsonRpcClient {
	pub fn new(endpoint: &str) -> anyhow::Result<Self> {
		let http = HttpClientBuilder::default().build(endpoint)?;
		Ok(Self { http })
	}

	async fn request<T: serde::de::DeserializeOwned>(
		&self,
		method: &str,
		params: jsonrpsee::core::params::ArrayParams,
	) -> Result<T, ChainClientError> {
		self.http
			.request(method, params)
			.await
			.map_err(|e| ChainClientError::Transient(anyhow::anyhow!("{method}: {e}")))
	}
}

#[async_trait]
impl ConsumerChainClient for JsonRpcClient {
	async fn query_finality_activation_block_height(&self) -> Result<u64, ChainClientError> {
		self.request("finality_activationBlockHeight", rpc_params![]).await
	}

	async fn query_latest_finalized_block(&self) -> Result<BlockInfo, ChainClientError> {
		self.request("finality_latestFinalizedBlock", rpc_params![]).await
	}

	async fn query_latest_block_height(&self) -> Result<u64, ChainClientError> {
		self.request("chain_latestBlockHeight", rpc_params![]).await
	}

	async fn query_finality_provider_has_power(
		&self,
		btc_pk: XOnlyPublicKey,
		height: u64,
	) -> Result<bool, ChainClientError> {
		self.request("finality_providerHasPower", rpc_params![btc_pk.to_string(), height]).await
	}

	async fn query_finality_provider_highest_voted_height(
		&self,
		btc_pk: XOnlyPublicKey,
	) -> Result<u64, ChainClientError> {
		self.request("finality_highestVotedHeight", rpc_params![btc_pk.to_string()]).await
	}

	async fn query_last_public_rand_commit(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
	) -> Result<Option<PubRandCommit>, ChainClientError> {
		self.request("finality_lastPublicRandCommit", rpc_params![btc_pk.to_string(), chain_id]).await
	}

	async fn commit_pub_rand_list(
		&self,
		request: PubRandCommitRequest,
	) -> Result<TxResponse, ChainClientError> {
		self.request(
			"finality_commitPubRandList",
			rpc_params![
				request.btc_pk.to_string(),
				request.chain_id,
				request.start_height,
				request.num_pub_rand,
				hex::encode(request.commitment),
				hex::encode(request.signature)
			],
		)
		.await
	}

	async fn submit_batch_finality_sigs(
		&self,
		submissions: Vec<FinalitySigSubmission>,
	) -> Result<TxResponse, ChainClientError> {
		let encoded: Vec<_> = submissions
			.iter()
			.map(|s| {
				serde_json::json!({
					"btc_pk": s.btc_pk.to_string(),
					"chain_id": s.chain_id,
					"height": s.height,
					"block_hash": hex::encode(s.block_hash),
					"pub_rand": hex::encode(s.pub_rand),
					"proof": s.proof,
					"eots_signature": hex::encode(s.eots_signature),
				})
			})
			.collect();
		self.request("finality_submitBatchFinalitySigs", rpc_params![encoded]).await
	}
}

#[async_trait]
impl BabylonClient for JsonRpcClient {
	async fn register_finality_provider(
		&self,
		btc_pk: XOnlyPublicKey,
		addr: &str,
		chain_id: &str,
		description: &str,
		commission_bps: u16,
	) -> Result<TxResponse, ChainClientError> {
		self.request(
			"babylon_registerFinalityProvider",
			rpc_params![btc_pk.to_string(), addr, chain_id, description, commission_bps],
		)
		.await
	}

	async fn update_commission_and_description(
		&self,
		btc_pk: XOnlyPublicKey,
		commission_bps: u16,
		description: &str,
	) -> Result<TxResponse, ChainClientError> {
		self.request(
			"babylon_updateCommissionAndDescription",
			rpc_params![btc_pk.to_string(), commission_bps, description],
		)
		.await
	}

	async fn query_balance(&self, addr: &str) -> Result<u128, ChainClientError> {
		self.request("babylon_queryBalance", rpc_params![addr]).await
	}
}
