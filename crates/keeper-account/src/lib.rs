//! Account management module for the gas keeper.
//!
//! The keeper signs its own transactions: the dispatcher needs the hash of a
//! transaction before it is sent so the attempt can be journaled first. An
//! account therefore produces fully signed, encoded payloads rather than
//! detached signatures.

use async_trait::async_trait;
use keeper_types::{
	Address, ConfigSchema, ImplementationRegistry, SignedTransaction, TransactionRequest,
};
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for account implementations.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Retrieves the address transactions are sent from.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs and encodes a transaction for `eth_sendRawTransaction`.
	async fn sign_transaction(
		&self,
		tx: &TransactionRequest,
	) -> Result<SignedTransaction, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Retrieves the address associated with the managed account.
	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.implementation.address().await
	}

	/// Signs a transaction using the managed account.
	pub async fn sign(&self, tx: &TransactionRequest) -> Result<SignedTransaction, AccountError> {
		self.implementation.sign_transaction(tx).await
	}
}
