//! `/healthz` liveness endpoint.
//!
//! Grounded on `engine/src/health.rs`'s shape (bind an address, answer 200
//! on the health path) but rebuilt on `warp` rather than hand-rolled
//! `httparse`/raw-`TcpStream` parsing, since `warp` is already a direct
//! dependency for the metrics endpoint (spec.md §9) and hand-rolling HTTP
//! parsing a second time in the same binary would be pure duplication.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use warp::Filter;

/// Flips to `false` the moment any provider reports a process-fatal error,
/// so an external process supervisor (systemd, k8s) sees the agent go
/// unhealthy before it exits.
#[derive(Clone)]
pub struct HealthState {
	healthy: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self { healthy: Arc::new(AtomicBool::new(true)) }
	}

	pub fn mark_unhealthy(&self) {
		self.healthy.store(false, Ordering::SeqCst);
	}

	pub fn is_healthy(&self) -> bool {
		self.healthy.load(Ordering::SeqCst)
	}
}

#[tracing::instrument(name = "health-server", skip_all, fields(%addr))]
pub fn serve(addr: SocketAddr, state: HealthState) -> tokio::task::JoinHandle<()> {
	let route = warp::path("healthz").and(warp::path::end()).map(move || {
		if state.is_healthy() {
			warp::reply::with_status("ok", warp::http::StatusCode::OK)
		} else {
			warp::reply::with_status("unhealthy", warp::http::StatusCode::SERVICE_UNAVAILABLE)
		}
	});
	tokio::spawn(async move {
		tracing::info!("serving health check");
		warp::serve(route).run(addr).await;
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn health_state_starts_healthy_and_can_only_go_one_way() {
		let state = HealthState::new();
		assert!(state.is_healthy());
		state.mark_unhealthy();
		assert!(!state.is_healthy());
	}
}
