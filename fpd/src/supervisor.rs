//! Critical-error supervision (spec.md §7/§8).
//!
//! Providers never decide for themselves whether a critical error should
//! take down the whole process: they report it here and keep running (or
//! stop their own loop, for a fatal-to-that-provider error) while the
//! supervisor makes the process-wide call. This mirrors the teacher's
//! pattern of a central place that owns "should we exit" (see
//! `engine/src/health.rs`'s readiness flag flipping process health), kept
//! to a plain channel since there is no multi-client scope to manage here.

use tokio::sync::mpsc;

use fp_primitives::AgentError;

/// A critical error raised by one provider's control loop, tagged with
/// which provider (if any) it came from.
#[derive(Debug)]
pub struct CriticalNotification {
	pub btc_pk: Option<secp256k1::XOnlyPublicKey>,
	pub chain_id: Option<String>,
	pub error: AgentError,
}

/// Process exit codes (spec.md §6): 0 normal, 1 fatal init, 2 critical
/// shutdown (equivocation attempt or corruption detected post-startup).
pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL_INIT: i32 = 1;
pub const EXIT_CRITICAL: i32 = 2;

pub struct Supervisor {
	rx: mpsc::UnboundedReceiver<CriticalNotification>,
}

#[derive(Clone)]
pub struct SupervisorHandle {
	tx: mpsc::UnboundedSender<CriticalNotification>,
}

impl SupervisorHandle {
	/// Reports a critical error. Never fails: if the supervisor has already
	/// shut down there is nothing useful left to do with the notification.
	pub fn report(&self, notification: CriticalNotification) {
		let _ = self.tx.send(notification);
	}
}

impl Supervisor {
	pub fn new() -> (Self, SupervisorHandle) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { rx }, SupervisorHandle { tx })
	}

	/// Consumes notifications until either the channel closes (every sender
	/// — i.e. every provider task — has exited cleanly, `EXIT_OK`) or a
	/// process-fatal error arrives (`EXIT_CRITICAL`). Non-fatal critical
	/// errors (e.g. `DataMissing` for a single provider) are logged and the
	/// loop keeps running; that provider's own task is responsible for
	/// pausing itself.
	pub async fn run(mut self) -> i32 {
		while let Some(notification) = self.rx.recv().await {
			let CriticalNotification { btc_pk, chain_id, error } = notification;
			tracing::error!(
				btc_pk = btc_pk.map(|pk| pk.to_string()),
				chain_id,
				error = %error,
				"critical error reported"
			);
			if error.is_process_fatal() {
				return EXIT_CRITICAL;
			}
		}
		EXIT_OK
	}
}

impl Default for Supervisor {
	fn default() -> Self {
		Self::new().0
	}
}
