//! Node access for the gas keeper.
//!
//! [`NodeInterface`] is the narrow set of JSON-RPC calls the keeper makes.
//! [`DeliveryService`] wraps an implementation and enforces a timeout on
//! every call, so a hung node surfaces as a transient error instead of
//! stalling the poll loop.

use async_trait::async_trait;
use keeper_types::{
	Address, BlockTag, ImplementationRegistry, SignedTransaction, TransactionHash,
	TransactionReceipt,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors that can occur while talking to the node.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// Connection or transport failure.
	#[error("Network error: {0}")]
	Network(String),
	/// The call did not complete within the configured timeout.
	#[error("Timed out after {0:?} waiting for {1}")]
	Timeout(Duration, &'static str),
	/// The node answered with something that could not be decoded.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
	/// The nonce was already used by another transaction.
	#[error("Nonce conflict: {0}")]
	NonceConflict(String),
	/// The node already holds this exact signed transaction.
	#[error("Already known: {0}")]
	AlreadyKnown(String),
	/// A different transaction with the same nonce is pending and this one
	/// does not outbid it. Which of the two gets mined is unknown.
	#[error("Replacement underpriced: {0}")]
	ReplacementUnderpriced(String),
	/// The account cannot pay for the transaction.
	#[error("Insufficient funds: {0}")]
	InsufficientFunds(String),
	/// The node refused the transaction for any other reason.
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	/// The node configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl DeliveryError {
	/// Whether retrying on a later cycle may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, DeliveryError::Network(_) | DeliveryError::Timeout(..))
	}
}

/// Classifies the error message of a rejected `eth_sendRawTransaction`.
///
/// Node implementations phrase these differently; the substrings below cover
/// geth, erigon, nethermind and reth.
pub fn classify_submission_error(message: &str) -> DeliveryError {
	let lower = message.to_ascii_lowercase();
	if lower.contains("already known") || lower.contains("known transaction") {
		DeliveryError::AlreadyKnown(message.to_string())
	} else if lower.contains("replacement") && lower.contains("underpriced") {
		DeliveryError::ReplacementUnderpriced(message.to_string())
	} else if lower.contains("nonce too low")
		|| lower.contains("nonce too high")
		|| lower.contains("invalid nonce")
	{
		DeliveryError::NonceConflict(message.to_string())
	} else if lower.contains("insufficient funds") {
		DeliveryError::InsufficientFunds(message.to_string())
	} else {
		DeliveryError::Rejected(message.to_string())
	}
}

/// The JSON-RPC calls the keeper needs from a chain node.
#[async_trait]
pub trait NodeInterface: Send + Sync {
	/// `eth_getBlockByNumber(tag, true)`. `None` when the node returns null.
	async fn get_block(&self, tag: BlockTag) -> Result<Option<serde_json::Value>, DeliveryError>;

	/// `eth_gasPrice`, in wei.
	async fn get_gas_price(&self) -> Result<u128, DeliveryError>;

	/// `eth_getTransactionCount(address, tag)`.
	async fn get_transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError>;

	/// `eth_sendRawTransaction`. Submission errors are classified with
	/// [`classify_submission_error`].
	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TransactionHash, DeliveryError>;

	/// `eth_getTransactionReceipt`. `None` while the transaction is unmined.
	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	/// `eth_call` against the latest block.
	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, DeliveryError>;
}

/// Connection settings passed to node factories.
#[derive(Debug, Clone)]
pub struct NodeConfig {
	pub rpc_url: String,
}

/// Type alias for node factory functions.
pub type NodeFactory = fn(&NodeConfig) -> Result<Box<dyn NodeInterface>, DeliveryError>;

/// Registry trait for node implementations.
pub trait NodeRegistry: ImplementationRegistry<Factory = NodeFactory> {}

/// Get all registered node implementations.
pub fn get_all_implementations() -> Vec<(&'static str, NodeFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}

/// Node access with an enforced per-call timeout.
pub struct DeliveryService {
	node: Box<dyn NodeInterface>,
	timeout: Duration,
}

impl DeliveryService {
	pub fn new(node: Box<dyn NodeInterface>, timeout: Duration) -> Self {
		Self { node, timeout }
	}

	async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, DeliveryError>
	where
		F: Future<Output = Result<T, DeliveryError>>,
	{
		match tokio::time::timeout(self.timeout, call).await {
			Ok(result) => result,
			Err(_) => {
				tracing::warn!(operation, timeout_secs = self.timeout.as_secs(), "Node call timed out");
				Err(DeliveryError::Timeout(self.timeout, operation))
			},
		}
	}

	/// Fetches a block with full transaction objects.
	pub async fn get_block(
		&self,
		tag: BlockTag,
	) -> Result<Option<serde_json::Value>, DeliveryError> {
		self.bounded("eth_getBlockByNumber", self.node.get_block(tag))
			.await
	}

	/// Suggested gas price in wei.
	pub async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		self.bounded("eth_gasPrice", self.node.get_gas_price()).await
	}

	/// Account nonce at the given tag.
	pub async fn get_nonce(&self, address: Address, tag: BlockTag) -> Result<u64, DeliveryError> {
		self.bounded(
			"eth_getTransactionCount",
			self.node.get_transaction_count(address, tag),
		)
		.await
	}

	/// Submits a signed transaction.
	///
	/// Returns the node's hash, which must match the locally computed one.
	pub async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionHash, DeliveryError> {
		let hash = self
			.bounded("eth_sendRawTransaction", self.node.send_raw_transaction(&tx.raw))
			.await?;
		if hash != tx.hash {
			tracing::warn!(
				local = %tx.hash,
				remote = %hash,
				"Node returned a different transaction hash"
			);
		}
		Ok(hash)
	}

	/// Receipt of a transaction, if mined.
	pub async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.bounded(
			"eth_getTransactionReceipt",
			self.node.get_transaction_receipt(hash),
		)
		.await
	}

	/// Read-only contract call.
	pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, DeliveryError> {
		self.bounded("eth_call", self.node.call(to, data)).await
	}
}
