//! Layered configuration: file < environment < CLI flags.
//!
//! Grounded on `api/bin/chainflip-ingress-egress-tracker/src/main.rs`'s
//! `CfSettings`/`TrackerOptions` pattern (the modern one used elsewhere in
//! the workspace, as opposed to `engine/src/settings.rs`'s older
//! `Config::new().merge(...)` API) — a settings struct deserialized via
//! `config::Config::builder()`, a `clap::Parser` struct that additionally
//! implements `config::Source` so command-line flags layer on top of env
//! vars and a config file without a third, bespoke merge step.

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File, FileFormat, Map, Source, Value};
use serde::Deserialize;

/// The deserialized, validated settings every subcommand runs against.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	/// Directory the RocksDB stores (nonces, proofs, provider records) live
	/// under.
	pub data_dir: String,
	pub consumer_chain_rpc_endpoint: String,
	pub babylon_rpc_endpoint: String,
	pub chain_id: String,
	#[serde(default = "default_num_pub_rand")]
	pub num_pub_rand: u32,
	#[serde(default = "default_timestamping_delay")]
	pub timestamping_delay: u64,
	#[serde(default = "default_min_randomness_before_exhaustion")]
	pub min_randomness_before_exhaustion: u64,
	#[serde(default = "default_idle_poll_interval_ms")]
	pub idle_poll_interval_ms: u64,
	#[serde(default = "default_rpc_timeout_secs")]
	pub rpc_timeout_secs: u64,
	#[serde(default = "default_metrics_addr")]
	pub metrics_addr: String,
	#[serde(default = "default_health_addr")]
	pub health_addr: String,
	/// Bitcoin network the provider keys' BIP32 derivation path is rooted
	/// in (`bitcoin`, `testnet`, `signet`, `regtest`).
	#[serde(default = "default_network")]
	pub network: String,
}

fn default_network() -> String {
	"bitcoin".to_string()
}

fn default_num_pub_rand() -> u32 {
	1_000
}
fn default_timestamping_delay() -> u64 {
	200
}
fn default_min_randomness_before_exhaustion() -> u64 {
	100
}
fn default_idle_poll_interval_ms() -> u64 {
	3_000
}
fn default_rpc_timeout_secs() -> u64 {
	5
}
fn default_metrics_addr() -> String {
	"127.0.0.1:9616".to_string()
}
fn default_health_addr() -> String {
	"127.0.0.1:9617".to_string()
}

impl Settings {
	pub fn bitcoin_network(&self) -> Result<bitcoin::Network, anyhow::Error> {
		match self.network.as_str() {
			"bitcoin" | "mainnet" => Ok(bitcoin::Network::Bitcoin),
			"testnet" => Ok(bitcoin::Network::Testnet),
			"signet" => Ok(bitcoin::Network::Signet),
			"regtest" => Ok(bitcoin::Network::Regtest),
			other => Err(anyhow::anyhow!("unknown network {other:?}")),
		}
	}

	/// Layers a config file (if present), then environment variables
	/// prefixed `FPD__` (double underscore as the nested-key separator, so
	/// e.g. `FPD__DATA_DIR=/var/lib/fpd`), then CLI flags, in that order of
	/// increasing precedence.
	pub fn load(config_file: Option<&str>, opts: CommandLineOptions) -> Result<Self, ConfigError> {
		let mut builder = Config::builder();
		if let Some(path) = config_file {
			builder = builder.add_source(File::new(path, FileFormat::Toml).required(false));
		}
		builder
			.add_source(Environment::with_prefix("FPD").separator("__"))
			.add_source(opts)
			.build()?
			.try_deserialize()
	}
}

/// CLI-flag overlay for [`Settings`], implementing [`config::Source`] so it
/// can be handed straight to [`config::ConfigBuilder::add_source`].
#[derive(Parser, Debug, Clone, Default)]
pub struct CommandLineOptions {
	#[clap(long = "data-dir", env = "FPD_DATA_DIR")]
	pub data_dir: Option<String>,
	#[clap(long = "consumer-chain-rpc-endpoint")]
	pub consumer_chain_rpc_endpoint: Option<String>,
	#[clap(long = "babylon-rpc-endpoint")]
	pub babylon_rpc_endpoint: Option<String>,
	#[clap(long = "chain-id")]
	pub chain_id: Option<String>,
	#[clap(long = "num-pub-rand")]
	pub num_pub_rand: Option<u32>,
	#[clap(long = "timestamping-delay")]
	pub timestamping_delay: Option<u64>,
	#[clap(long = "min-randomness-before-exhaustion")]
	pub min_randomness_before_exhaustion: Option<u64>,
	#[clap(long = "idle-poll-interval-ms")]
	pub idle_poll_interval_ms: Option<u64>,
	#[clap(long = "rpc-timeout-secs")]
	pub rpc_timeout_secs: Option<u64>,
	#[clap(long = "metrics-addr")]
	pub metrics_addr: Option<String>,
	#[clap(long = "health-addr")]
	pub health_addr: Option<String>,
	#[clap(long = "network")]
	pub network: Option<String>,
}

/// Inserts `value` under `key` only if it is `Some`; a CLI flag left unset
/// must never shadow a value already layered in from the environment or a
/// config file with an empty/default one.
fn insert_command_line_option<T: Into<Value> + Clone>(
	map: &mut HashMap<String, Value>,
	key: &str,
	value: &Option<T>,
) {
	if let Some(value) = value {
		map.insert(key.to_string(), value.clone().into());
	}
}

impl Source for CommandLineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new(self.clone())
	}

	fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
		let mut map = HashMap::new();
		insert_command_line_option(&mut map, "data_dir", &self.data_dir);
		insert_command_line_option(&mut map, "consumer_chain_rpc_endpoint", &self.consumer_chain_rpc_endpoint);
		insert_command_line_option(&mut map, "babylon_rpc_endpoint", &self.babylon_rpc_endpoint);
		insert_command_line_option(&mut map, "chain_id", &self.chain_id);
		insert_command_line_option(&mut map, "num_pub_rand", &self.num_pub_rand);
		insert_command_line_option(&mut map, "timestamping_delay", &self.timestamping_delay);
		insert_command_line_option(
			&mut map,
			"min_randomness_before_exhaustion",
			&self.min_randomness_before_exhaustion,
		);
		insert_command_line_option(&mut map, "idle_poll_interval_ms", &self.idle_poll_interval_ms);
		insert_command_line_option(&mut map, "rpc_timeout_secs", &self.rpc_timeout_secs);
		insert_command_line_option(&mut map, "metrics_addr", &self.metrics_addr);
		insert_command_line_option(&mut map, "health_addr", &self.health_addr);
		insert_command_line_option(&mut map, "network", &self.network);
		Ok(map)
	}
}

/// Top-level CLI surface (spec.md §6): `create-key`, `register`, `start`,
/// `stop`.
#[derive(Parser, Debug)]
#[command(name = "fpd", version)]
pub struct Cli {
	#[clap(long = "config", global = true)]
	pub config_file: Option<String>,
	#[command(flatten)]
	pub settings: CommandLineOptions,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Generates a new BIP32-derived EOTS key under the master secret,
	/// encrypted at rest with the given passphrase.
	CreateKey {
		#[clap(long)]
		name: String,
		#[clap(long, env = "FPD_KEY_PASSPHRASE", hide_env_values = true)]
		passphrase: String,
		#[clap(long, default_value = "m/86'/0'/0'/0/0")]
		hd_path: String,
	},
	/// Registers a finality provider on Babylon for a given key and
	/// consumer chain.
	Register {
		#[clap(long)]
		name: String,
		#[clap(long, env = "FPD_KEY_PASSPHRASE", hide_env_values = true)]
		passphrase: String,
		#[clap(long)]
		addr: String,
		#[clap(long, default_value = "")]
		description: String,
		#[clap(long, default_value_t = 0)]
		commission_bps: u16,
	},
	/// Starts the agent: loads every registered provider and runs its
	/// control loop until a shutdown signal is received.
	Start {
		#[clap(long, env = "FPD_KEY_PASSPHRASE", hide_env_values = true)]
		passphrase: String,
	},
	/// Sends a shutdown signal to a running `fpd start` process (spec.md
	/// §6's "of external daemon, only insofar as the core is driven by
	/// it"). Not in scope for this crate beyond the CLI surface itself —
	/// wiring an actual IPC/signal channel to a separate running process is
	/// left to the surrounding deployment (e.g. systemd, a process
	/// supervisor sending SIGTERM).
	Stop,
}
