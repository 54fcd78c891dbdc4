//! Local private key account.
//!
//! Holds a secp256k1 key in memory and signs legacy (EIP-155) transactions.

use crate::{AccountError, AccountInterface};
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Bytes, TxKind};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use keeper_types::{
	Address, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, SecretString,
	SignedTransaction, TransactionHash, TransactionRequest, ValidationError,
};

/// Account backed by a private key held in memory.
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a wallet from a hex private key, with or without `0x`.
	pub fn new(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer = private_key.with_exposed(|key| {
			key.parse::<PrivateKeySigner>()
				.map_err(|_| AccountError::InvalidKey("Invalid private key format".to_string()))
		})?;
		Ok(Self { signer })
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_transaction(
		&self,
		tx: &TransactionRequest,
	) -> Result<SignedTransaction, AccountError> {
		let mut legacy = TxLegacy {
			chain_id: Some(tx.chain_id),
			nonce: tx.nonce,
			gas_price: tx.gas_price,
			gas_limit: tx.gas_limit,
			to: TxKind::Call(tx.to),
			value: tx.value,
			input: Bytes::from(tx.data.clone()),
		};

		let signature = self
			.signer
			.sign_transaction_sync(&mut legacy)
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;

		let envelope = TxEnvelope::from(legacy.into_signed(signature));
		let hash = TransactionHash(envelope.tx_hash().to_vec());
		tracing::debug!(tx_hash = %hash, nonce = tx.nonce, "Signed transaction");

		Ok(SignedTransaction {
			hash,
			nonce: tx.nonce,
			raw: envelope.encoded_2718(),
		})
	}
}

/// Configuration schema for LocalWallet.
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|value| {
				let key = value.as_str().unwrap_or_default();
				let key = key.strip_prefix("0x").unwrap_or(key);

				if key.len() != 64 {
					return Err("Private key must be 64 hex characters (32 bytes)".to_string());
				}
				if !key.chars().all(|c| c.is_ascii_hexdigit()) {
					return Err("Private key must be valid hex".to_string());
				}
				Ok(())
			})],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create a local account.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded key, normally supplied as `${KEEPER_PRIVATE_KEY}`
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(&private_key)?))
}

/// Registry for the local wallet implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}
