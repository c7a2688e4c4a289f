use fp_primitives::AgentError;
use secp256k1::XOnlyPublicKey;

/// Errors specific to the nonce store's single-use contract (spec.md
/// §4.A). Kept distinct from [`AgentError`] because only one of these
/// variants ([`NonceStoreError::Equivocation`]) is itself a critical
/// error; the others are caller-logic errors the commit/vote pipelines
/// are expected to handle inline (e.g. `AlreadyExists` on a commit retry).
#[derive(Debug, thiserror::Error)]
pub enum NonceStoreError {
	#[error("a nonce already exists for this (btc_pk, chain_id, height)")]
	AlreadyExists,

	#[error("no nonce found for this (btc_pk, chain_id, height)")]
	NotFound,

	#[error("nonce already consumed for a different message digest")]
	Equivocation { existing_digest: [u8; 32] },

	#[error(transparent)]
	Store(#[from] fp_store::StoreError),
}

impl NonceStoreError {
	pub fn into_agent_error(self, btc_pk: XOnlyPublicKey, chain_id: String, height: u64) -> AgentError {
		match self {
			NonceStoreError::NotFound =>
				AgentError::DataMissing { btc_pk, chain_id, height, what: "nonce" },
			NonceStoreError::Equivocation { .. } =>
				AgentError::EquivocationAttempt { btc_pk, chain_id, height },
			NonceStoreError::AlreadyExists =>
				AgentError::Corruption(format!(
					"nonce for {btc_pk}/{chain_id}/{height} already exists but insert_batch was called again"
				)),
			NonceStoreError::Store(e) => AgentError::Corruption(e.to_string()),
		}
	}
}
