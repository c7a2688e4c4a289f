//! External block source abstraction (spec.md §9): the control loop never
//! queries the chain for "new blocks" directly, it asks a [`BlockPoller`],
//! which is free to batch, rate-limit, or (in tests) replay a fixed
//! sequence.

use async_trait::async_trait;

use fp_chain_client::ConsumerChainClient;
use fp_primitives::{AgentError, BlockInfo};

/// Delivers finalized blocks starting at `from_height`, in ascending,
/// contiguous order. Implementations are free to return fewer blocks than
/// exist (e.g. a page size) but must never skip a height or return blocks
/// out of order.
#[async_trait]
pub trait BlockPoller: Send + Sync {
	async fn poll(&self, from_height: u64) -> Result<Vec<BlockInfo>, AgentError>;
}

/// Production poller, backed by `query_latest_finalized_block`. The
/// `ConsumerChainClient` trait only surfaces the chain's current tip (not a
/// ranged block query — spec.md §6's Non-goal on historical sync), so this
/// poller delivers at most that one block per call, and only once it is at
/// or past `from_height`. The provider's own loop re-polls every tick, so a
/// fast-advancing chain is simply caught up over several ticks rather than
/// in one batch.
pub struct ChainTipPoller {
	chain: std::sync::Arc<dyn ConsumerChainClient>,
}

impl ChainTipPoller {
	pub fn new(chain: std::sync::Arc<dyn ConsumerChainClient>) -> Self {
		Self { chain }
	}
}

#[async_trait]
impl BlockPoller for ChainTipPoller {
	async fn poll(&self, from_height: u64) -> Result<Vec<BlockInfo>, AgentError> {
		let tip = self.chain.query_latest_finalized_block().await?;
		if tip.height < from_height {
			return Ok(Vec::new());
		}
		Ok(vec![tip])
	}
}

/// Fixed-sequence test double: replays a preset list of blocks, serving
/// whichever suffix starts at `from_height`.
#[cfg(any(test, feature = "test-support"))]
pub struct FixedPoller {
	blocks: Vec<BlockInfo>,
}

#[cfg(any(test, feature = "test-support"))]
impl FixedPoller {
	pub fn new(blocks: Vec<BlockInfo>) -> Self {
		Self { blocks }
	}
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl BlockPoller for FixedPoller {
	async fn poll(&self, from_height: u64) -> Result<Vec<BlockInfo>, AgentError> {
		Ok(self.blocks.iter().filter(|b| b.height >= from_height).copied().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use fp_chain_client::fake::FakeChainClient;

	#[tokio::test]
	async fn chain_tip_poller_returns_empty_when_tip_is_behind() {
		let fake = FakeChainClient::new();
		fake.advance_chain(BlockInfo::new(10, [0u8; 32]));
		let poller = ChainTipPoller::new(std::sync::Arc::new(fake));
		let blocks = poller.poll(11).await.unwrap();
		assert!(blocks.is_empty());
	}

	#[tokio::test]
	async fn chain_tip_poller_returns_the_tip_when_caught_up() {
		let fake = FakeChainClient::new();
		fake.advance_chain(BlockInfo::new(10, [9u8; 32]));
		let poller = ChainTipPoller::new(std::sync::Arc::new(fake));
		let blocks = poller.poll(10).await.unwrap();
		assert_eq!(blocks, vec![BlockInfo::new(10, [9u8; 32])]);
	}

	#[tokio::test]
	async fn fixed_poller_serves_the_suffix_from_a_height() {
		let poller =
			FixedPoller::new(vec![BlockInfo::new(1, [1u8; 32]), BlockInfo::new(2, [2u8; 32])]);
		let blocks = poller.poll(2).await.unwrap();
		assert_eq!(blocks, vec![BlockInfo::new(2, [2u8; 32])]);
	}
}
