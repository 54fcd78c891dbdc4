//! Main entry point for the gas keeper service.
//!
//! Polls the chain at a fixed interval, records a gas metric sample per
//! block, and releases queued deposits whenever the suggested gas price is
//! at or below the configured threshold. Runs until ctrl-c or SIGTERM.

use clap::Parser;
use keeper_config::Config;
use std::path::PathBuf;

mod factory_registry;

/// Command-line arguments for the keeper service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/keeper.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started keeper");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.keeper.id);

	let keeper = factory_registry::build_keeper_from_config(config).await?;
	keeper.run().await;

	tracing::info!("Stopped keeper");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_args_defaults() {
		let args = Args::parse_from(["keeper"]);
		assert_eq!(args.config, PathBuf::from("config/keeper.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["keeper", "--config", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[tokio::test]
	async fn test_build_keeper_from_config_file() {
		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		write!(
			file,
			r#"
[keeper]
id = "file-keeper"
poll_interval_seconds = 30
price_threshold_gwei = "0.4"

[network]
chain_id = 31337
rpc_url = "http://localhost:8545"
deposit_contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[storage]
primary = "memory"
[storage.implementations.memory]

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
"#
		)
		.unwrap();

		let config = Config::from_file(file.path().to_str().unwrap()).await.unwrap();
		assert_eq!(config.keeper.poll_interval_seconds, 30);
		assert_eq!(config.network.client, "evm_alloy");

		let keeper = factory_registry::build_keeper_from_config(config).await.unwrap();
		assert_eq!(keeper.config().keeper.id, "file-keeper");
	}
}
