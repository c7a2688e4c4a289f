//! Per-provider control loop (spec.md §5): "resolve-start → commit-if-needed
//! → poll-next-batch → vote → repeat", run serially within one provider and
//! concurrently across providers (one `tokio::spawn`'d task each).

use std::sync::Arc;
use std::time::Duration;

use secp256k1::XOnlyPublicKey;

use fp_chain_client::ConsumerChainClient;
use fp_eots::EotsManager;
use fp_primitives::AgentError;

use crate::commit::{self, CommitConfig};
use crate::poller::BlockPoller;
use crate::provider_store::{FinalityProviderStore, ProofStore};
use crate::supervisor::{CriticalNotification, SupervisorHandle};
use crate::vote::{self, PreparedVote, SkipReason};

/// Knobs for one provider's control loop.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
	pub chain_id: String,
	pub commit: CommitConfig,
	/// Delay between control-loop iterations once a tick finds nothing new
	/// to do. Short enough to notice new blocks promptly, long enough not
	/// to hammer the chain client with empty polls.
	pub idle_poll_interval: Duration,
}

/// Drives one provider's control loop until `shutdown` fires.
///
/// Re-reads `last_voted_height` from `fps` at the top of every iteration
/// rather than tracking a local cursor, so a block that was `Skipped` for
/// `NoVotingPower` or `RandomnessNotCommitted` is naturally retried on the
/// next tick with no special-case bookkeeping, and a crash between a
/// successful submission and the local `last_voted_height` write can never
/// cause a re-vote (I3) — the next tick simply re-derives the same start
/// height the resolver would have produced.
pub struct Provider {
	chain: Arc<dyn ConsumerChainClient>,
	eots: Arc<EotsManager>,
	proofs: Arc<ProofStore>,
	fps: Arc<FinalityProviderStore>,
	poller: Arc<dyn BlockPoller>,
	supervisor: SupervisorHandle,
	btc_pk: XOnlyPublicKey,
	cfg: ProviderConfig,
}

impl Provider {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		chain: Arc<dyn ConsumerChainClient>,
		eots: Arc<EotsManager>,
		proofs: Arc<ProofStore>,
		fps: Arc<FinalityProviderStore>,
		poller: Arc<dyn BlockPoller>,
		supervisor: SupervisorHandle,
		btc_pk: XOnlyPublicKey,
		cfg: ProviderConfig,
	) -> Self {
		Self { chain, eots, proofs, fps, poller, supervisor, btc_pk, cfg }
	}

	/// Runs until `shutdown` resolves. Every non-fatal critical error is
	/// reported to the supervisor and pauses this provider only (the loop
	/// keeps retrying on the next tick, since the underlying cause — a
	/// missing proof, a stalled chain — may resolve itself or need operator
	/// intervention the supervisor surfaces). A process-fatal error is also
	/// reported, and this loop additionally exits: there is no safe next
	/// action for a provider that just had an equivocation attempt refused
	/// or detected local corruption.
	pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
		loop {
			tokio::select! {
				biased;
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						return;
					}
				}
				result = self.tick() => {
					match result {
						Ok(()) => {
							tokio::select! {
								biased;
								_ = shutdown.changed() => if *shutdown.borrow() { return },
								_ = tokio::time::sleep(self.cfg.idle_poll_interval) => {},
							}
						}
						Err(error) => {
							let fatal = error.is_process_fatal();
							self.supervisor.report(CriticalNotification {
								btc_pk: Some(self.btc_pk),
								chain_id: Some(self.cfg.chain_id.to_string()),
								error,
							});
							if fatal {
								return;
							}
							tokio::select! {
								biased;
								_ = shutdown.changed() => if *shutdown.borrow() { return },
								_ = tokio::time::sleep(self.cfg.idle_poll_interval) => {},
							}
						}
					}
				}
			}
		}
	}

	/// One iteration: resolve-start is implicit in re-reading
	/// `last_voted_height` and polling from `last_voted_height + 1`;
	/// commit-if-needed; poll-next-batch; vote.
	async fn tick(&self) -> Result<(), AgentError> {
		if let Some(new_commit) = commit::maybe_commit(
			self.chain.as_ref(),
			&self.eots,
			&self.proofs,
			self.btc_pk,
			&self.cfg.chain_id,
			self.cfg.commit,
		)
		.await?
		{
			tracing::info!(
				btc_pk = %self.btc_pk,
				chain_id = %self.cfg.chain_id,
				start = new_commit.start_height,
				num_pub_rand = new_commit.num_pub_rand,
				"submitted public randomness commitment"
			);
		}

		let record = self.fps.get(self.btc_pk)?.ok_or(AgentError::DataMissing {
			btc_pk: self.btc_pk,
			chain_id: self.cfg.chain_id.to_string(),
			height: 0,
			what: "finality provider record",
		})?;
		let last_voted_height = record.last_voted_height;

		let commit = self.chain.query_last_public_rand_commit(self.btc_pk, &self.cfg.chain_id).await?;
		let blocks = self.poller.poll(last_voted_height + 1).await?;
		if blocks.is_empty() {
			return Ok(());
		}

		let prepared = vote::prepare_batch(
			self.chain.as_ref(),
			&self.eots,
			&self.proofs,
			self.btc_pk,
			&self.cfg.chain_id,
			last_voted_height,
			commit.as_ref(),
			&blocks,
		)
		.await?;

		for p in &prepared {
			match p {
				PreparedVote::Skipped { height, reason: SkipReason::NoVotingPower } =>
					tracing::debug!(btc_pk = %self.btc_pk, height, "skipped: no voting power"),
				PreparedVote::Skipped { height, reason: SkipReason::RandomnessNotCommitted } =>
					tracing::debug!(btc_pk = %self.btc_pk, height, "skipped: randomness not committed"),
				PreparedVote::Skipped { height, reason: SkipReason::AlreadyVoted } =>
					tracing::trace!(btc_pk = %self.btc_pk, height, "skipped: already voted"),
				PreparedVote::Equivocation { height } =>
					tracing::error!(btc_pk = %self.btc_pk, height, "equivocation attempt refused"),
				PreparedVote::Ready(_) => {},
			}
		}

		if let Some(max_height) = vote::submit_batch(self.chain.as_ref(), &self.fps, self.btc_pk, &prepared).await? {
			tracing::info!(btc_pk = %self.btc_pk, chain_id = %self.cfg.chain_id, max_height, "submitted finality votes");
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::poller::FixedPoller;
	use fp_chain_client::fake::FakeChainClient;
	use fp_eots::MasterSecret;
	use fp_primitives::{BlockInfo, FinalityProviderRecord};
	use fp_store::PersistentKv;
	use std::time::Duration;

	fn setup() -> (tempfile::TempDir, Arc<EotsManager>, Arc<ProofStore>, Arc<FinalityProviderStore>, XOnlyPublicKey) {
		let dir = tempfile::tempdir().unwrap();
		let kv = Arc::new(PersistentKv::open_and_migrate(&dir.path().join("db")).unwrap());
		let master = MasterSecret::from_seed(vec![11u8; 32], bitcoin::Network::Bitcoin).unwrap();
		let manager = Arc::new(EotsManager::new(kv.clone(), master));
		let pk = manager.create_key("fp-1", "pw", "m/0'/0'/7'").unwrap();
		let proofs = Arc::new(ProofStore::new(kv.clone()));
		let fps = Arc::new(FinalityProviderStore::new(kv));
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

	#[tokio::test]
	async fn a_tick_with_no_new_blocks_is_a_quiet_no_op() {
		let (_dir, manager, proofs, fps, pk) = setup();
		let fake = Arc::new(FakeChainClient::new());
		fake.set_finality_activation_height(1);
		fake.advance_chain(BlockInfo::new(0, [0u8; 32]));
		let poller: Arc<dyn BlockPoller> = Arc::new(FixedPoller::new(vec![]));
		let (supervisor, handle) = crate::supervisor::Supervisor::new();

		let provider = Provider::new(
			fake,
			manager,
			proofs,
			fps,
			poller,
			handle,
			pk,
			ProviderConfig {
				chain_id: "chain-a".to_string(),
				commit: CommitConfig { num_pub_rand: 10, timestamping_delay: 0, min_randomness_before_exhaustion: 0 },
				idle_poll_interval: Duration::from_millis(10),
			},
		);
		provider.tick().await.unwrap();
		drop(provider);
		drop(supervisor);
	}

	#[tokio::test]
	async fn a_full_tick_commits_then_votes_a_polled_block() {
		let (_dir, manager, proofs, fps, pk) = setup();
		let fake = Arc::new(FakeChainClient::new());
		fake.set_finality_activation_height(100);
		fake.advance_chain(BlockInfo::new(100, [1u8; 32]));

		let poller: Arc<dyn BlockPoller> = Arc::new(FixedPoller::new(vec![BlockInfo::new(100, [1u8; 32])]));
		let (_supervisor, handle) = crate::supervisor::Supervisor::new();

		let provider = Provider::new(
			fake.clone(),
			manager,
			proofs,
			fps.clone(),
			poller,
			handle,
			pk,
			ProviderConfig {
				chain_id: "chain-a".to_string(),
				commit: CommitConfig { num_pub_rand: 10, timestamping_delay: 0, min_randomness_before_exhaustion: 0 },
				idle_poll_interval: Duration::from_millis(10),
			},
		);
		provider.tick().await.unwrap();

		assert_eq!(fps.get(pk).unwrap().unwrap().last_voted_height, 100);
		assert_eq!(fake.submitted_sigs().len(), 1);
	}
}
