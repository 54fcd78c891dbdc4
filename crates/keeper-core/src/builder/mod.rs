//! Builder pattern for constructing keeper engines.
//!
//! Composes a KeeperEngine from registered implementations using factory
//! functions: storage and account implementations are selected by the
//! `primary` key of their config sections, the node client by
//! `network.client`.

use crate::engine::KeeperEngine;
use keeper_account::{AccountError, AccountInterface, AccountService};
use keeper_config::Config;
use keeper_delivery::{DeliveryError, DeliveryService, NodeConfig, NodeInterface};
use keeper_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during keeper engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct KeeperFactories<SF, AF, NF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
	pub node_factories: HashMap<String, NF>,
}

/// Builder for constructing a KeeperEngine with pluggable implementations.
pub struct KeeperBuilder {
	config: Config,
}

impl KeeperBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine, creating only the primary implementation of each
	/// component.
	pub async fn build<SF, AF, NF>(
		self,
		factories: KeeperFactories<SF, AF, NF>,
	) -> Result<KeeperEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		NF: Fn(&NodeConfig) -> Result<Box<dyn NodeInterface>, DeliveryError>,
	{
		// Storage
		let primary_storage = &self.config.storage.primary;
		let storage_config = self
			.config
			.storage
			.implementations
			.get(primary_storage)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary storage '{}' has no configuration",
					primary_storage
				))
			})?;
		let storage_factory = factories
			.storage_factories
			.get(primary_storage)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!(
					"storage implementation '{}'",
					primary_storage
				))
			})?;
		let storage_backend = storage_factory(storage_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %primary_storage,
				error = %e,
				"Failed to create storage implementation"
			);
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary_storage, e
			))
		})?;
		tracing::info!(component = "storage", implementation = %primary_storage, "Loaded");
		let storage = Arc::new(StorageService::new(storage_backend));

		// Account
		let primary_account = &self.config.account.primary;
		let account_config = self
			.config
			.account
			.implementations
			.get(primary_account)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary account '{}' has no configuration",
					primary_account
				))
			})?;
		let account_factory = factories
			.account_factories
			.get(primary_account)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!(
					"account implementation '{}'",
					primary_account
				))
			})?;
		let account_impl = account_factory(account_config).map_err(|e| {
			tracing::error!(
				component = "account",
				implementation = %primary_account,
				error = %e,
				"Failed to create account implementation"
			);
			BuilderError::Config(format!(
				"Failed to create account implementation '{}': {}",
				primary_account, e
			))
		})?;
		let account = Arc::new(AccountService::new(account_impl));

		// Fetch the keeper address once during initialization
		let sender = account.get_address().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to get keeper address");
			BuilderError::Config(format!("Failed to get keeper address: {}", e))
		})?;
		tracing::info!(component = "account", implementation = %primary_account, address = %sender, "Loaded");

		// Node
		let client = &self.config.network.client;
		let node_factory = factories.node_factories.get(client).ok_or_else(|| {
			BuilderError::MissingComponent(format!("node client '{}'", client))
		})?;
		let node = node_factory(&NodeConfig {
			rpc_url: self.config.network.rpc_url.clone(),
		})
		.map_err(|e| {
			tracing::error!(component = "delivery", implementation = %client, error = %e, "Failed to create node client");
			BuilderError::Config(format!("Failed to create node client '{}': {}", client, e))
		})?;
		tracing::info!(
			component = "delivery",
			implementation = %client,
			chain_id = self.config.network.chain_id,
			"Loaded"
		);
		let delivery = Arc::new(DeliveryService::new(
			node,
			Duration::from_secs(self.config.network.rpc_timeout_seconds),
		));

		KeeperEngine::new(self.config, sender, storage, account, delivery)
			.map_err(|e| BuilderError::Config(e.to_string()))
	}
}
