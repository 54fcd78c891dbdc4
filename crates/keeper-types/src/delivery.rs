//! Transaction types for the keeper system.
//!
//! This module defines the transaction payloads that flow between the
//! dispatcher, the signing account and the node: unsigned requests, signed
//! raw payloads, hashes and receipts.

use crate::utils::with_0x_prefix;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash representation.
///
/// Stores transaction hashes as raw bytes; displayed as 0x-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&with_0x_prefix(&hex::encode(&self.0)))
	}
}

/// Transaction receipt containing execution details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
}

/// Unsigned transaction parameters built by the dispatcher.
///
/// Uses legacy gas pricing: one `gas_price` in wei applies to the whole
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
	pub chain_id: u64,
	pub nonce: u64,
	pub to: Address,
	pub data: Vec<u8>,
	pub value: U256,
	pub gas_limit: u64,
	pub gas_price: u128,
}

/// A signed, encoded transaction ready for `eth_sendRawTransaction`.
///
/// The hash is known before submission, which lets the dispatcher journal
/// the attempt ahead of sending it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	pub hash: TransactionHash,
	pub nonce: u64,
	pub raw: Vec<u8>,
}
