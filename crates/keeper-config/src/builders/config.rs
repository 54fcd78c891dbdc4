//! Configuration builder for tests.
//!
//! Produces a valid [`Config`] backed by in-memory storage and a local
//! account, so engine tests do not need a TOML file.

use crate::{AccountConfig, Config, KeeperConfig, NetworkConfig, StorageConfig};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Anvil's first default account.
const TEST_PRIVATE_KEY: &str =
	"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Builder for `Config` instances with test defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	keeper_id: String,
	poll_interval_seconds: u64,
	price_threshold_gwei: Decimal,
	max_nonce_retries: u32,
	max_concurrent_dispatches: usize,
	sample_pending_pool: bool,
	chain_id: u64,
	deposit_contract: String,
	gas_limit: u64,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			keeper_id: "test-keeper".to_string(),
			poll_interval_seconds: 1,
			price_threshold_gwei: Decimal::new(4, 1),
			max_nonce_retries: 3,
			max_concurrent_dispatches: 1,
			sample_pending_pool: false,
			chain_id: 31337,
			deposit_contract: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
			gas_limit: 200_000,
		}
	}

	pub fn keeper_id(mut self, id: impl Into<String>) -> Self {
		self.keeper_id = id.into();
		self
	}

	pub fn poll_interval_seconds(mut self, seconds: u64) -> Self {
		self.poll_interval_seconds = seconds;
		self
	}

	pub fn price_threshold_gwei(mut self, threshold: Decimal) -> Self {
		self.price_threshold_gwei = threshold;
		self
	}

	pub fn max_nonce_retries(mut self, retries: u32) -> Self {
		self.max_nonce_retries = retries;
		self
	}

	pub fn max_concurrent_dispatches(mut self, limit: usize) -> Self {
		self.max_concurrent_dispatches = limit;
		self
	}

	pub fn sample_pending_pool(mut self, enabled: bool) -> Self {
		self.sample_pending_pool = enabled;
		self
	}

	pub fn chain_id(mut self, chain_id: u64) -> Self {
		self.chain_id = chain_id;
		self
	}

	pub fn deposit_contract(mut self, address: impl Into<String>) -> Self {
		self.deposit_contract = address.into();
		self
	}

	pub fn gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = gas_limit;
		self
	}

	pub fn build(self) -> Config {
		let mut local = toml::map::Map::new();
		local.insert(
			"private_key".to_string(),
			toml::Value::String(TEST_PRIVATE_KEY.to_string()),
		);

		Config {
			keeper: KeeperConfig {
				id: self.keeper_id,
				poll_interval_seconds: self.poll_interval_seconds,
				price_threshold_gwei: self.price_threshold_gwei,
				max_nonce_retries: self.max_nonce_retries,
				max_concurrent_dispatches: self.max_concurrent_dispatches,
				sample_pending_pool: self.sample_pending_pool,
			},
			network: NetworkConfig {
				chain_id: self.chain_id,
				rpc_url: "http://localhost:8545".to_string(),
				client: "evm_alloy".to_string(),
				rpc_timeout_seconds: 10,
				deposit_contract: self.deposit_contract,
				gas_limit: self.gas_limit,
			},
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations: HashMap::from([(
					"memory".to_string(),
					toml::Value::Table(toml::map::Map::new()),
				)]),
			},
			account: AccountConfig {
				primary: "local".to_string(),
				implementations: HashMap::from([("local".to_string(), toml::Value::Table(local))]),
			},
		}
	}
}
