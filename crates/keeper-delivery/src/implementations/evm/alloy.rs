//! Alloy-based node client.
//!
//! Talks JSON-RPC over HTTP through an unfilled root provider: the keeper
//! signs locally and only ever sends raw transactions, so no wallet or
//! filler layers are attached.

use crate::{classify_submission_error, DeliveryError, NodeConfig, NodeInterface};
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Bytes, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use keeper_types::{Address, BlockTag, ImplementationRegistry, TransactionHash, TransactionReceipt};

/// Node client backed by an alloy HTTP provider.
pub struct AlloyNode {
	provider: RootProvider,
}

impl AlloyNode {
	pub fn new(rpc_url: &str) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Configuration(format!("Invalid RPC URL: {}", e)))?;
		Ok(Self {
			provider: RootProvider::new_http(url),
		})
	}
}

fn block_id(tag: BlockTag) -> BlockId {
	match tag {
		BlockTag::Latest => BlockId::Number(BlockNumberOrTag::Latest),
		BlockTag::Pending => BlockId::Number(BlockNumberOrTag::Pending),
	}
}

/// Maps errors from read-only calls. Error responses on reads are treated as
/// transient; only submissions are classified further.
fn read_error(operation: &str, err: TransportError) -> DeliveryError {
	match err {
		RpcError::DeserError { err, .. } => {
			DeliveryError::MalformedResponse(format!("{}: {}", operation, err))
		},
		other => DeliveryError::Network(format!("{} failed: {}", operation, other)),
	}
}

fn submission_error(err: TransportError) -> DeliveryError {
	match err {
		RpcError::ErrorResp(payload) => classify_submission_error(&payload.message),
		RpcError::DeserError { err, .. } => DeliveryError::MalformedResponse(err.to_string()),
		other => DeliveryError::Network(format!("Failed to send transaction: {}", other)),
	}
}

fn to_b256(hash: &TransactionHash) -> Result<B256, DeliveryError> {
	if hash.0.len() != 32 {
		return Err(DeliveryError::MalformedResponse(format!(
			"Transaction hash must be 32 bytes, got {}",
			hash.0.len()
		)));
	}
	Ok(B256::from_slice(&hash.0))
}

#[async_trait]
impl NodeInterface for AlloyNode {
	async fn get_block(&self, tag: BlockTag) -> Result<Option<serde_json::Value>, DeliveryError> {
		// Raw JSON keeps parsing tolerant of chains whose blocks do not fit
		// alloy's typed block model
		self.provider
			.raw_request::<_, Option<serde_json::Value>>(
				"eth_getBlockByNumber".into(),
				(tag.as_str(), true),
			)
			.await
			.map_err(|e| read_error("eth_getBlockByNumber", e))
	}

	async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		self.provider
			.get_gas_price()
			.await
			.map_err(|e| read_error("eth_gasPrice", e))
	}

	async fn get_transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.block_id(block_id(tag))
			.await
			.map_err(|e| read_error("eth_getTransactionCount", e))
	}

	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TransactionHash, DeliveryError> {
		let pending = self
			.provider
			.send_raw_transaction(raw)
			.await
			.map_err(submission_error)?;

		let hash = TransactionHash(pending.tx_hash().to_vec());
		tracing::info!(tx_hash = %hash, "Submitted transaction");
		Ok(hash)
	}

	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(to_b256(hash)?)
			.await
			.map_err(|e| read_error("eth_getTransactionReceipt", e))?;

		Ok(receipt.map(|receipt| TransactionReceipt {
			hash: TransactionHash(receipt.transaction_hash.to_vec()),
			block_number: receipt.block_number.unwrap_or(0),
			success: receipt.status(),
		}))
	}

	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, DeliveryError> {
		let request = TransactionRequest::default()
			.to(to)
			.input(TransactionInput::new(Bytes::from(data)));

		let result = self
			.provider
			.call(request)
			.await
			.map_err(|e| read_error("eth_call", e))?;
		Ok(result.to_vec())
	}
}

/// Factory function to create an alloy node client.
pub fn create_node(config: &NodeConfig) -> Result<Box<dyn NodeInterface>, DeliveryError> {
	if !config.rpc_url.starts_with("http://") && !config.rpc_url.starts_with("https://") {
		return Err(DeliveryError::Configuration(format!(
			"Only http(s) RPC endpoints are supported, got '{}'",
			config.rpc_url
		)));
	}
	Ok(Box::new(AlloyNode::new(&config.rpc_url)?))
}

/// Registry for the alloy node implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = crate::NodeFactory;

	fn factory() -> Self::Factory {
		create_node
	}
}

impl crate::NodeRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::rpc::json_rpc::ErrorPayload;
	use alloy::transports::TransportErrorKind;

	fn error_response(message: &'static str) -> TransportError {
		RpcError::ErrorResp(ErrorPayload {
			code: -32000,
			message: message.into(),
			data: None,
		})
	}

	#[test]
	fn test_submission_error_mapping() {
		assert!(matches!(
			submission_error(error_response("nonce too low")),
			DeliveryError::NonceConflict(_)
		));
		assert!(matches!(
			submission_error(error_response("insufficient funds for gas * price + value")),
			DeliveryError::InsufficientFunds(_)
		));
		assert!(matches!(
			submission_error(error_response("exceeds block gas limit")),
			DeliveryError::Rejected(_)
		));
		assert!(submission_error(TransportErrorKind::backend_gone()).is_transient());
	}

	#[test]
	fn test_read_errors_are_transient() {
		assert!(read_error("eth_gasPrice", error_response("header not found")).is_transient());
	}

	#[test]
	fn test_factory_rejects_websocket_urls() {
		let config = NodeConfig {
			rpc_url: "ws://localhost:8546".to_string(),
		};
		assert!(matches!(
			create_node(&config),
			Err(DeliveryError::Configuration(_))
		));
	}

	#[test]
	fn test_hash_length_is_checked() {
		assert!(to_b256(&TransactionHash(vec![1, 2, 3])).is_err());
		assert!(to_b256(&TransactionHash(vec![0; 32])).is_ok());
	}
}
