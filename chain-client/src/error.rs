//! Errors raised by [`crate::ConsumerChainClient`] / [`crate::BabylonClient`]
//! implementations, and their mapping onto the shared [`AgentError`]
//! taxonomy (spec.md §7).

use fp_primitives::AgentError;

#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
	/// Network error, timeout, or a 5xx-equivalent RPC response. Always
	/// retried by [`crate::retry::RetryingClient`] before ever reaching
	/// provider logic.
	#[error("transient RPC error: {0}")]
	Transient(#[from] anyhow::Error),

	/// The chain rejected the call because it already holds equivalent or
	/// stronger state (e.g. a commit covering an equal-or-larger range, or
	/// a vote at or below the provider's last voted height).
	#[error("chain already has equivalent state")]
	IdempotentConflict,

	/// The call was well-formed and reached the chain, but the chain
	/// returned a definitive "no" that is not a transient condition (e.g.
	/// querying a provider that was never registered).
	#[error("chain returned a non-retryable rejection: {0}")]
	Rejected(String),
}

impl From<ChainClientError> for AgentError {
	fn from(err: ChainClientError) -> Self {
		match err {
			ChainClientError::Transient(e) => AgentError::Transient(e),
			ChainClientError::IdempotentConflict => AgentError::IdempotentConflict,
			ChainClientError::Rejected(msg) => AgentError::Corruption(msg),
		}
	}
}
