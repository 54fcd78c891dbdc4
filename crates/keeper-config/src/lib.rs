//! Configuration module for the gas keeper.
//!
//! Configuration is read once at startup from a TOML file. String values may
//! reference environment variables as `${VAR}` or `${VAR:-default}`, which is
//! how the signing key and database credentials are normally supplied.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["storage.toml", "account.toml"]` to include other files
//! - Each top-level section must be unique across all files

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

#[cfg(feature = "testing")]
pub use builders::config::ConfigBuilder;

use keeper_types::Address;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the keeper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Poll loop and dispatch policy settings.
	pub keeper: KeeperConfig,
	/// The chain being observed and the deposit contract on it.
	pub network: NetworkConfig,
	/// Persistence backend configuration.
	pub storage: StorageConfig,
	/// Signing account configuration.
	pub account: AccountConfig,
}

/// Poll loop and dispatch policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeeperConfig {
	/// Identifier of this keeper instance, used in logs.
	pub id: String,
	/// Seconds to sleep between the end of one cycle and the start of the next.
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
	/// Dispatch happens only when the suggested gas price is at or below this
	/// value, in gwei. Written as a string to keep it exact.
	#[serde(default = "default_price_threshold_gwei")]
	pub price_threshold_gwei: Decimal,
	/// Immediate retries with a refreshed nonce after a nonce conflict.
	#[serde(default = "default_max_nonce_retries")]
	pub max_nonce_retries: u32,
	/// Upper bound on items dispatched concurrently within one cycle.
	#[serde(default = "default_max_concurrent_dispatches")]
	pub max_concurrent_dispatches: usize,
	/// Whether to also sample the pending block's transaction count.
	#[serde(default)]
	pub sample_pending_pool: bool,
}

fn default_poll_interval_seconds() -> u64 {
	60
}

fn default_price_threshold_gwei() -> Decimal {
	// 0.4 gwei
	Decimal::new(4, 1)
}

fn default_max_nonce_retries() -> u32 {
	3
}

fn default_max_concurrent_dispatches() -> usize {
	1
}

/// The observed chain and the deposit contract dispatched against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// EIP-155 chain id used for signing.
	pub chain_id: u64,
	/// HTTP JSON-RPC endpoint of the node.
	pub rpc_url: String,
	/// Registered node client implementation.
	#[serde(default = "default_node_client")]
	pub client: String,
	/// Timeout applied to every node call.
	#[serde(default = "default_rpc_timeout_seconds")]
	pub rpc_timeout_seconds: u64,
	/// Address of the contract holding queued deposits.
	pub deposit_contract: String,
	/// Gas limit for each dispatch transaction.
	#[serde(default = "default_gas_limit")]
	pub gas_limit: u64,
}

fn default_node_client() -> String {
	"evm_alloy".to_string()
}

fn default_rpc_timeout_seconds() -> u64 {
	10
}

fn default_gas_limit() -> u64 {
	200_000
}

impl NetworkConfig {
	/// Parses the configured deposit contract address.
	pub fn deposit_contract_address(&self) -> Result<Address, ConfigError> {
		Address::from_str(&self.deposit_contract).map_err(|e| {
			ConfigError::Validation(format!(
				"Invalid deposit_contract '{}': {}",
				self.deposit_contract, e
			))
		})
	}
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the signing account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)));
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, resolving includes and environment
	/// variables, then validates it.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration.
	///
	/// Checks the keeper id and intervals, the network endpoint and contract
	/// address, and that both primary implementations are configured.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.keeper.id.is_empty() {
			return Err(ConfigError::Validation("Keeper ID cannot be empty".into()));
		}
		if self.keeper.poll_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"poll_interval_seconds must be greater than 0".into(),
			));
		}
		if self.keeper.poll_interval_seconds > 86400 {
			return Err(ConfigError::Validation(
				"poll_interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}
		if self.keeper.price_threshold_gwei.is_sign_negative()
			&& !self.keeper.price_threshold_gwei.is_zero()
		{
			return Err(ConfigError::Validation(
				"price_threshold_gwei cannot be negative".into(),
			));
		}
		if self.keeper.max_concurrent_dispatches == 0 {
			return Err(ConfigError::Validation(
				"max_concurrent_dispatches must be at least 1".into(),
			));
		}

		if self.network.chain_id == 0 {
			return Err(ConfigError::Validation("chain_id must be non-zero".into()));
		}
		if !self.network.rpc_url.starts_with("http://")
			&& !self.network.rpc_url.starts_with("https://")
		{
			return Err(ConfigError::Validation(format!(
				"rpc_url must be an http(s) URL, got '{}'",
				self.network.rpc_url
			)));
		}
		if self.network.client.is_empty() {
			return Err(ConfigError::Validation(
				"network.client cannot be empty".into(),
			));
		}
		if self.network.rpc_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"rpc_timeout_seconds must be greater than 0".into(),
			));
		}
		if self.network.gas_limit < 21_000 {
			return Err(ConfigError::Validation(format!(
				"gas_limit {} is below the 21000 intrinsic minimum",
				self.network.gas_limit
			)));
		}
		self.network.deposit_contract_address()?;

		validate_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		validate_primary("account", &self.account.primary, &self.account.implementations)?;

		Ok(())
	}
}

fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

/// Parses configuration from a TOML string.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const VALID: &str = r#"
[keeper]
id = "sepolia-keeper"
poll_interval_seconds = 30
price_threshold_gwei = "5.0"

[network]
chain_id = 11155111
rpc_url = "https://rpc.sepolia.example"
deposit_contract = "0x3a77498d7BB9855c03ce60bDf7e7baae6A603bC5"

[storage]
primary = "memory"
[storage.implementations.memory]

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("KEEPER_TEST_HOST", "localhost");
		std::env::set_var("KEEPER_TEST_PORT", "8545");

		let input = "rpc_url = \"http://${KEEPER_TEST_HOST}:${KEEPER_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "rpc_url = \"http://localhost:8545\"");

		std::env::remove_var("KEEPER_TEST_HOST");
		std::env::remove_var("KEEPER_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${KEEPER_MISSING_VAR:-fallback}\"";
		assert_eq!(resolve_env_vars(input).unwrap(), "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${KEEPER_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("KEEPER_MISSING_VAR"));
	}

	#[test]
	fn test_valid_config_and_defaults() {
		let config: Config = VALID.parse().unwrap();
		assert_eq!(config.keeper.id, "sepolia-keeper");
		assert_eq!(config.keeper.poll_interval_seconds, 30);
		assert_eq!(config.keeper.price_threshold_gwei, Decimal::new(50, 1));
		assert_eq!(config.keeper.max_nonce_retries, 3);
		assert_eq!(config.keeper.max_concurrent_dispatches, 1);
		assert!(!config.keeper.sample_pending_pool);
		assert_eq!(config.network.rpc_timeout_seconds, 10);
		assert_eq!(config.network.gas_limit, 200_000);
		assert!(config.network.deposit_contract_address().is_ok());
	}

	#[test]
	fn test_threshold_defaults_to_point_four_gwei() {
		let without_threshold = VALID.replace("price_threshold_gwei = \"5.0\"\n", "");
		let config: Config = without_threshold.parse().unwrap();
		assert_eq!(config.keeper.price_threshold_gwei.to_string(), "0.4");
	}

	#[test]
	fn test_private_key_from_env() {
		std::env::set_var(
			"KEEPER_TEST_PRIVATE_KEY",
			"0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
		);
		let templated = VALID.replace(
			"\"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80\"",
			"\"${KEEPER_TEST_PRIVATE_KEY}\"",
		);
		let config: Config = templated.parse().unwrap();
		let key = config.account.implementations["local"]
			.get("private_key")
			.and_then(|v| v.as_str())
			.unwrap()
			.to_string();
		assert!(key.starts_with("0x59c6"));
		std::env::remove_var("KEEPER_TEST_PRIVATE_KEY");
	}

	#[test]
	fn test_rejects_bad_contract_address() {
		let bad = VALID.replace("0x3a77498d7BB9855c03ce60bDf7e7baae6A603bC5", "0x1234");
		let err = bad.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("deposit_contract"));
	}

	#[test]
	fn test_rejects_missing_primary_storage() {
		let bad = VALID.replace("primary = \"memory\"", "primary = \"sqlite\"");
		let err = bad.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary storage 'sqlite'"));
	}

	#[test]
	fn test_rejects_zero_poll_interval() {
		let bad = VALID.replace("poll_interval_seconds = 30", "poll_interval_seconds = 0");
		assert!(bad.parse::<Config>().is_err());
	}

	#[test]
	fn test_rejects_non_http_rpc_url() {
		let bad = VALID.replace("https://rpc.sepolia.example", "ws://rpc.sepolia.example");
		let err = bad.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("rpc_url"));
	}
}
