//! Dynamic factory registry for keeper implementations.
//!
//! Collects every implementation each crate registers and resolves the
//! ones named in the configuration.

use keeper_account::AccountFactory;
use keeper_config::Config;
use keeper_core::{KeeperBuilder, KeeperEngine, KeeperFactories};
use keeper_delivery::NodeFactory;
use keeper_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub account: HashMap<String, AccountFactory>,
	pub node: HashMap<String, NodeFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			account: HashMap::new(),
			node: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}

	pub fn register_node(&mut self, name: impl Into<String>, factory: NodeFactory) {
		self.node.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the global registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in keeper_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in keeper_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.register_account(name, factory);
		}

		for (name, factory) in keeper_delivery::get_all_implementations() {
			tracing::debug!("Registering node implementation: {}", name);
			registry.register_node(name, factory);
		}

		registry
	})
}

/// Builds a factory map for the configured names, failing on unknown ones.
macro_rules! build_factories {
	($registry:expr, $names:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $names {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds the keeper engine from configuration using the global registry.
pub async fn build_keeper_from_config(
	config: Config,
) -> Result<KeeperEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations.keys(), storage, "storage");
	let account_factories =
		build_factories!(registry, config.account.implementations.keys(), account, "account");
	let node_factories = build_factories!(
		registry,
		std::iter::once(&config.network.client),
		node,
		"node"
	);

	let factories = KeeperFactories {
		storage_factories,
		account_factories,
		node_factories,
	};

	Ok(KeeperBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use keeper_config::ConfigBuilder;

	#[test]
	fn test_registry_contains_all_implementations() {
		let registry = get_registry();
		for name in ["file", "memory", "sqlite"] {
			assert!(registry.storage.contains_key(name), "missing storage {}", name);
		}
		assert!(registry.account.contains_key("local"));
		assert!(registry.node.contains_key("evm_alloy"));
	}

	#[tokio::test]
	async fn test_build_keeper_with_minimal_config() {
		let config = ConfigBuilder::new().keeper_id("test-keeper").build();
		let keeper = build_keeper_from_config(config).await.unwrap();
		assert_eq!(keeper.config().keeper.id, "test-keeper");
	}

	#[tokio::test]
	async fn test_unknown_implementation_lists_available() {
		let mut config = ConfigBuilder::new().build();
		config
			.storage
			.implementations
			.insert("redis".to_string(), toml::Value::Table(Default::default()));

		let err = build_keeper_from_config(config).await.err().unwrap();
		let message = err.to_string();
		assert!(message.contains("Unknown storage implementation 'redis'"));
		assert!(message.contains("file, memory, sqlite"));
	}
}
