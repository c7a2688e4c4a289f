//! The error taxonomy shared by every layer of the agent (spec.md §7).
//!
//! Each variant maps to exactly one of the six error kinds the design calls
//! out: transient, idempotent-conflict, data-missing, equivocation-attempt,
//! corruption, and config/fatal-init. Keeping them as one enum (rather than
//! scattering `anyhow::Error` everywhere) lets the supervisor in `fpd`
//! pattern-match on kind to decide whether to retry, pause a provider, or
//! exit the process.

use secp256k1::XOnlyPublicKey;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
	/// RPC timeouts, mempool congestion, temporary chain unavailability.
	/// Retried locally with bounded exponential backoff; never surfaced to
	/// provider logic as a terminal failure.
	#[error("transient error: {0}")]
	Transient(#[from] anyhow::Error),

	/// The chain already has the equivalent state (e.g. a commit covering
	/// an equal-or-greater range, or a vote it has already recorded).
	/// Treated as success by the caller.
	#[error("idempotent conflict: chain already has equivalent state")]
	IdempotentConflict,

	/// An expected nonce or proof is absent from local storage even though
	/// the on-chain commit still references the height. Fatal for the
	/// affected height.
	#[error("data missing for {btc_pk}/{chain_id}/{height}: {what}")]
	DataMissing { btc_pk: XOnlyPublicKey, chain_id: String, height: u64, what: &'static str },

	/// The nonce store refused to reuse a nonce for a second, distinct
	/// message at the same height. Never retried; the provider is paused.
	#[error("equivocation attempt refused for {btc_pk}/{chain_id}/{height}")]
	EquivocationAttempt { btc_pk: XOnlyPublicKey, chain_id: String, height: u64 },

	/// A store returned internally inconsistent bytes, or an on-chain
	/// commit references a range the local proof store does not have.
	/// Requires operator intervention.
	#[error("corruption detected: {0}")]
	Corruption(String),

	/// Missing key, bad passphrase, unreachable chain at startup. The
	/// process exits non-zero without starting any provider.
	#[error("fatal initialization error: {0}")]
	FatalInit(#[source] anyhow::Error),
}

impl AgentError {
	/// Whether this error should be escalated to the critical-error
	/// channel (spec.md §7) rather than swallowed inside the pipeline.
	pub fn is_critical(&self) -> bool {
		!matches!(self, AgentError::Transient(_) | AgentError::IdempotentConflict)
	}

	/// Whether the critical-error supervisor should terminate the whole
	/// process (exit code 2) rather than merely pausing the provider that
	/// raised it.
	pub fn is_process_fatal(&self) -> bool {
		matches!(self, AgentError::EquivocationAttempt { .. } | AgentError::Corruption(_))
	}
}
