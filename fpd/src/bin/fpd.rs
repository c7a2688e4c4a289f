//! `fpd` binary: pure wiring over the `fpd` library crate (spec.md §6's CLI
//! surface — `create-key`, `register`, `start`, `stop`).
//!
//! Grounded on `engine/src/main.rs`'s shape: parse CLI, build settings,
//! install a `tracing-subscriber` layer, then dispatch on the subcommand.
//! Every subcommand here loads exactly the stores/managers it needs rather
//! than bootstrapping the whole agent for, e.g., `create-key`.

use std::{net::SocketAddr, str::FromStr, sync::Arc};

use clap::Parser;

use fp_chain_client::{jsonrpc::JsonRpcClient, retry::RetryPolicy, BabylonClient, ConsumerChainClient};
use fp_eots::{EotsManager, MasterSecret};
use fp_primitives::FinalityProviderRecord;
use fp_store::PersistentKv;
use fpd::config::{Cli, Command, Settings};
use fpd::provider::{Provider, ProviderConfig};
use fpd::provider_store::{FinalityProviderStore, ProofStore};
use fpd::supervisor::{Supervisor, EXIT_CRITICAL, EXIT_FATAL_INIT, EXIT_OK};
use fpd::{commit::CommitConfig, health, metrics, poller::ChainTipPoller};

fn install_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
	Settings::load(cli.config_file.as_deref(), cli.settings.clone()).map_err(anyhow::Error::from)
}

/// Opens this process's RocksDB store and the [`EotsManager`] over it,
/// loading the master seed from `data_dir` (generating and persisting one,
/// encrypted under `passphrase`, on first run — [`MasterSecret::load_or_generate`]).
fn open_eots_manager(settings: &Settings, passphrase: &str) -> anyhow::Result<(Arc<PersistentKv>, Arc<EotsManager>)> {
	let kv = Arc::new(PersistentKv::open_and_migrate(std::path::Path::new(&settings.data_dir).join("db").as_path())?);
	let master = MasterSecret::load_or_generate(&kv, passphrase, settings.bitcoin_network()?)?;
	Ok((kv.clone(), Arc::new(EotsManager::new(kv, master))))
}

fn build_chain_client(endpoint: &str, rpc_timeout_secs: u64, name: &'static str) -> anyhow::Result<Arc<dyn ConsumerChainClient>> {
	let client = JsonRpcClient::new(endpoint)?;
	let policy = RetryPolicy { initial_timeout: std::time::Duration::from_secs(rpc_timeout_secs), max_attempts: None };
	Ok(Arc::new(fp_chain_client::retry::RetryingClient::new(client, name, policy)))
}

fn build_babylon_client(endpoint: &str, rpc_timeout_secs: u64) -> anyhow::Result<Arc<dyn BabylonClient>> {
	let client = JsonRpcClient::new(endpoint)?;
	let policy = RetryPolicy { initial_timeout: std::time::Duration::from_secs(rpc_timeout_secs), max_attempts: Some(5) };
	Ok(Arc::new(fp_chain_client::retry::RetryingClient::new(client, "babylon", policy)))
}

async fn run_create_key(settings: Settings, name: String, passphrase: String, hd_path: String) -> anyhow::Result<i32> {
	let (_kv, manager) = open_eots_manager(&settings, &passphrase)?;
	let btc_pk = manager.create_key(&name, &passphrase, &hd_path)?;
	println!("{btc_pk}");
	Ok(EXIT_OK)
}

async fn run_register(
	settings: Settings,
	name: String,
	passphrase: String,
	addr: String,
	description: String,
	commission_bps: u16,
) -> anyhow::Result<i32> {
	let (kv, manager) = open_eots_manager(&settings, &passphrase)?;
	let btc_pk = manager.unlock_key(&name, &passphrase)?;

	let babylon = build_babylon_client(&settings.babylon_rpc_endpoint, settings.rpc_timeout_secs)?;
	babylon
		.register_finality_provider(btc_pk, &addr, &settings.chain_id, &description, commission_bps)
		.await?;

	let fps = FinalityProviderStore::new(kv);
	fps.register(FinalityProviderRecord {
		btc_pk,
		addr,
		chain_id: settings.chain_id.clone(),
		description,
		commission_bps,
		last_voted_height: 0,
	})?;

	println!("registered {btc_pk} on chain {}", settings.chain_id);
	Ok(EXIT_OK)
}

/// Starts the agent: unlocks every provider already registered for
/// `settings.chain_id` and runs each one's control loop (spec.md §5) until a
/// shutdown signal arrives.
async fn run_start(settings: Settings, passphrase: String) -> anyhow::Result<i32> {
	let (kv, manager) = open_eots_manager(&settings, &passphrase)?;
	let fps = Arc::new(FinalityProviderStore::new(kv.clone()));
	let proofs = Arc::new(ProofStore::new(kv));

	let chain = build_chain_client(&settings.consumer_chain_rpc_endpoint, settings.rpc_timeout_secs, "consumer-chain")?;
	let poller = Arc::new(ChainTipPoller::new(chain.clone()));

	metrics::register_metrics();
	let health_state = health::HealthState::new();
	let health_addr = SocketAddr::from_str(&settings.health_addr)?;
	let metrics_addr = SocketAddr::from_str(&settings.metrics_addr)?;
	health::serve(health_addr, health_state.clone());
	metrics::serve(metrics_addr);

	let (supervisor, supervisor_handle) = Supervisor::new();
	let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

	// Every provider registered for this `chain_id` gets unlocked by name
	// (resolved through the keystore's pubkey index) and its own
	// `tokio::spawn`'d task (spec.md §5): tasks run concurrently across
	// providers, but each task's own loop is strictly serial.
	let mut handles = Vec::new();
	for record in fps.list_all()? {
		if record.chain_id != settings.chain_id {
			continue;
		}
		let name = manager.name_for_pk(&record.btc_pk)?;
		manager.unlock_key(&name, &passphrase)?;

		let provider = Provider::new(
			chain.clone(),
			manager.clone(),
			proofs.clone(),
			fps.clone(),
			poller.clone(),
			supervisor_handle.clone(),
			record.btc_pk,
			ProviderConfig {
				chain_id: settings.chain_id.clone(),
				commit: CommitConfig {
					num_pub_rand: settings.num_pub_rand,
					timestamping_delay: settings.timestamping_delay,
					min_randomness_before_exhaustion: settings.min_randomness_before_exhaustion,
				},
				idle_poll_interval: std::time::Duration::from_millis(settings.idle_poll_interval_ms),
			},
		);
		handles.push(tokio::spawn(provider.run(shutdown_rx.clone())));
	}

	if handles.is_empty() {
		tracing::warn!(chain_id = settings.chain_id, "no registered providers found for this chain_id");
	}

	let mut supervisor_task = tokio::spawn(supervisor.run());

	let exit_code = tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("shutdown signal received, draining provider tasks");
			let _ = shutdown_tx.send(true);
			drop(supervisor_handle);
			for handle in handles {
				let _ = handle.await;
			}
			supervisor_task.await.unwrap_or(EXIT_OK)
		}
		result = &mut supervisor_task => {
			tracing::error!("supervisor exited on its own; draining provider tasks");
			health_state.mark_unhealthy();
			let _ = shutdown_tx.send(true);
			for handle in handles {
				let _ = handle.await;
			}
			result.unwrap_or(EXIT_CRITICAL)
		}
	};

	Ok(exit_code)
}

fn run_stop() -> anyhow::Result<i32> {
	// spec.md §6: of the `stop` subcommand, only the CLI surface itself is
	// this crate's concern — sending an actual signal to a separately
	// running `fpd start` process is deployment-specific (systemd, a
	// process supervisor) and out of scope here.
	println!("send SIGTERM to the running `fpd start` process to stop it gracefully");
	Ok(EXIT_OK)
}

fn fatal_init(error: anyhow::Error) -> ! {
	tracing::error!(%error, "fatal initialization error");
	std::process::exit(EXIT_FATAL_INIT);
}

fn main() -> anyhow::Result<()> {
	install_tracing();
	let cli = Cli::parse();

	let exit_code = match &cli.command {
		Command::Stop => run_stop(),
		Command::CreateKey { name, passphrase, hd_path } => {
			let settings = load_settings(&cli).unwrap_or_else(|e| fatal_init(e));
			let rt = tokio::runtime::Runtime::new()?;
			rt.block_on(run_create_key(settings, name.clone(), passphrase.clone(), hd_path.clone()))
		},
		Command::Register { name, passphrase, addr, description, commission_bps } => {
			let settings = load_settings(&cli).unwrap_or_else(|e| fatal_init(e));
			let rt = tokio::runtime::Runtime::new()?;
			rt.block_on(run_register(
				settings,
				name.clone(),
				passphrase.clone(),
				addr.clone(),
				description.clone(),
				*commission_bps,
			))
		},
		Command::Start { passphrase } => {
			let settings = load_settings(&cli).unwrap_or_else(|e| fatal_init(e));
			let rt = tokio::runtime::Runtime::new()?;
			rt.block_on(run_start(settings, passphrase.clone()))
		},
	};

	std::process::exit(match exit_code {
		Ok(code) => code,
		Err(error) => {
			tracing::error!(%error, "fatal error");
			EXIT_FATAL_INIT
		},
	});
}
