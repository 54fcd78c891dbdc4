//! Chain snapshot reader.
//!
//! Turns the raw `eth_getBlockByNumber` JSON into a [`ChainSnapshot`]. Quantities
//! are big-endian hex; fees are converted from wei to gwei with exact decimal
//! arithmetic.

use crate::CycleError;
use chrono::{DateTime, TimeZone, Utc};
use keeper_delivery::DeliveryService;
use keeper_types::{parse_quantity, wei_to_gwei, BlockTag, ChainSnapshot};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Reads normalized snapshots from the node.
pub struct SnapshotReader {
	delivery: Arc<DeliveryService>,
	chain_id: u64,
	sample_pending_pool: bool,
}

impl SnapshotReader {
	pub fn new(delivery: Arc<DeliveryService>, chain_id: u64, sample_pending_pool: bool) -> Self {
		Self {
			delivery,
			chain_id,
			sample_pending_pool,
		}
	}

	/// Reads and parses the block at `tag`.
	///
	/// When pending-pool sampling is enabled, the pending block's transaction
	/// count is attached; a failure of that secondary read only clears the
	/// field.
	#[instrument(skip_all, fields(tag = %tag))]
	pub async fn read_snapshot(&self, tag: BlockTag) -> Result<ChainSnapshot, CycleError> {
		let block = self
			.delivery
			.get_block(tag)
			.await?
			.ok_or_else(|| CycleError::ChainEmpty(tag.to_string()))?;

		let mut snapshot = parse_block(self.chain_id, &block)?;

		if self.sample_pending_pool {
			snapshot.pending_pool_size = self.read_pending_pool_size().await;
		}

		tracing::debug!(
			block_number = snapshot.block_number,
			base_fee_gwei = %snapshot.base_fee_gwei,
			gas_used = snapshot.gas_used,
			gas_limit = snapshot.gas_limit,
			transaction_count = snapshot.transaction_count,
			"Read chain snapshot"
		);
		Ok(snapshot)
	}

	async fn read_pending_pool_size(&self) -> Option<u64> {
		match self.delivery.get_block(BlockTag::Pending).await {
			Ok(Some(block)) => match block.get("transactions").and_then(Value::as_array) {
				Some(txs) => Some(txs.len() as u64),
				None => {
					tracing::warn!("Pending block has no transaction list");
					None
				},
			},
			Ok(None) => {
				tracing::warn!("Node returned no pending block");
				None
			},
			Err(e) => {
				tracing::warn!(error = %e, "Failed to sample pending pool");
				None
			},
		}
	}
}

fn field<'a>(block: &'a Value, name: &str) -> Result<&'a str, CycleError> {
	block
		.get(name)
		.and_then(Value::as_str)
		.ok_or_else(|| CycleError::MalformedResponse(format!("missing field '{}'", name)))
}

fn quantity(block: &Value, name: &str) -> Result<u128, CycleError> {
	let raw = field(block, name)?;
	parse_quantity(raw).ok_or_else(|| {
		CycleError::MalformedResponse(format!("field '{}' is not a hex quantity: {}", name, raw))
	})
}

fn quantity_u64(block: &Value, name: &str) -> Result<u64, CycleError> {
	u64::try_from(quantity(block, name)?)
		.map_err(|_| CycleError::MalformedResponse(format!("field '{}' exceeds 64 bits", name)))
}

fn gwei(wei: u128, name: &str) -> Result<Decimal, CycleError> {
	wei_to_gwei(wei)
		.ok_or_else(|| CycleError::MalformedResponse(format!("field '{}' out of range", name)))
}

/// Parses a full-transaction block object.
///
/// A missing `baseFeePerGas` (pre-London chains) counts as zero. The
/// average priority fee is taken over transactions declaring
/// `maxPriorityFeePerGas`, zero if none do, and absent when the block only
/// lists transaction hashes.
pub fn parse_block(chain_id: u64, block: &Value) -> Result<ChainSnapshot, CycleError> {
	let block_number = quantity_u64(block, "number")?;
	let gas_used = quantity_u64(block, "gasUsed")?;
	let gas_limit = quantity_u64(block, "gasLimit")?;

	let seconds = i64::try_from(quantity(block, "timestamp")?)
		.map_err(|_| CycleError::MalformedResponse("timestamp out of range".into()))?;
	let timestamp: DateTime<Utc> = Utc
		.timestamp_opt(seconds, 0)
		.single()
		.ok_or_else(|| CycleError::MalformedResponse("timestamp out of range".into()))?;

	let base_fee_gwei = match block.get("baseFeePerGas") {
		None | Some(Value::Null) => Decimal::ZERO,
		Some(_) => gwei(quantity(block, "baseFeePerGas")?, "baseFeePerGas")?,
	};

	let transactions = block
		.get("transactions")
		.and_then(Value::as_array)
		.ok_or_else(|| CycleError::MalformedResponse("missing field 'transactions'".into()))?;

	Ok(ChainSnapshot {
		chain_id,
		block_number,
		timestamp,
		base_fee_gwei,
		gas_used,
		gas_limit,
		transaction_count: transactions.len() as u64,
		average_priority_fee_gwei: average_priority_fee(transactions)?,
		pending_pool_size: None,
	})
}

fn average_priority_fee(transactions: &[Value]) -> Result<Option<Decimal>, CycleError> {
	if transactions.iter().any(|tx| !tx.is_object()) {
		return Ok(None);
	}

	let mut total = Decimal::ZERO;
	let mut count: u64 = 0;
	for tx in transactions {
		if tx.get("maxPriorityFeePerGas").is_some_and(|v| !v.is_null()) {
			let fee = gwei(quantity(tx, "maxPriorityFeePerGas")?, "maxPriorityFeePerGas")?;
			total = total
				.checked_add(fee)
				.ok_or_else(|| CycleError::MalformedResponse("priority fee sum overflow".into()))?;
			count += 1;
		}
	}

	if count == 0 {
		return Ok(Some(Decimal::ZERO));
	}
	Ok(Some((total / Decimal::from(count)).normalize()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{block_json, FakeNode};
	use keeper_delivery::DeliveryError;
	use serde_json::json;
	use std::str::FromStr;
	use std::time::Duration;

	fn dec(s: &str) -> Decimal {
		Decimal::from_str(s).unwrap()
	}

	#[test]
	fn test_parse_london_block() {
		let block = json!({
			"number": "0x10",
			"timestamp": "0x65a0c0f0",
			"baseFeePerGas": "0x3b9aca00",
			"gasUsed": "0x5208",
			"gasLimit": "0x1c9c380",
			"transactions": [
				{ "hash": "0x01", "maxPriorityFeePerGas": "0x77359400" },
				{ "hash": "0x02", "maxPriorityFeePerGas": "0x3b9aca00" },
				{ "hash": "0x03", "gasPrice": "0x1" }
			]
		});

		let snapshot = parse_block(1, &block).unwrap();
		assert_eq!(snapshot.block_number, 16);
		assert_eq!(snapshot.base_fee_gwei, dec("1"));
		assert_eq!(snapshot.gas_used, 21_000);
		assert_eq!(snapshot.gas_limit, 30_000_000);
		assert_eq!(snapshot.transaction_count, 3);
		// (2 + 1) / 2 over the two declaring transactions
		assert_eq!(snapshot.average_priority_fee_gwei, Some(dec("1.5")));
		assert_eq!(snapshot.timestamp.timestamp(), 0x65a0c0f0);
	}

	#[test]
	fn test_missing_base_fee_is_zero() {
		let block = json!({
			"number": "0x1",
			"timestamp": "0x1",
			"gasUsed": "0x0",
			"gasLimit": "0x1",
			"transactions": [{ "hash": "0x01", "gasPrice": "0x1" }]
		});
		let snapshot = parse_block(1, &block).unwrap();
		assert_eq!(snapshot.base_fee_gwei, Decimal::ZERO);
		assert_eq!(snapshot.average_priority_fee_gwei, Some(Decimal::ZERO));
	}

	#[test]
	fn test_hash_only_transactions_leave_priority_fee_absent() {
		let block = json!({
			"number": "0x1",
			"timestamp": "0x1",
			"gasUsed": "0x0",
			"gasLimit": "0x1",
			"transactions": ["0xabc"]
		});
		let snapshot = parse_block(1, &block).unwrap();
		assert_eq!(snapshot.transaction_count, 1);
		assert_eq!(snapshot.average_priority_fee_gwei, None);
	}

	#[test]
	fn test_over_capacity_block_is_accepted() {
		let block = json!({
			"number": "0x1",
			"timestamp": "0x1",
			"gasUsed": "0x20",
			"gasLimit": "0x10",
			"transactions": []
		});
		let snapshot = parse_block(1, &block).unwrap();
		assert!(snapshot.is_over_capacity());
	}

	#[test]
	fn test_malformed_blocks() {
		let missing = json!({ "number": "0x1", "timestamp": "0x1", "transactions": [] });
		assert!(matches!(
			parse_block(1, &missing),
			Err(CycleError::MalformedResponse(_))
		));

		let non_numeric = json!({
			"number": "0x1",
			"timestamp": "0x1",
			"gasUsed": "lots",
			"gasLimit": "0x1",
			"transactions": []
		});
		assert!(matches!(
			parse_block(1, &non_numeric),
			Err(CycleError::MalformedResponse(_))
		));
	}

	#[tokio::test]
	async fn test_null_block_is_chain_empty() {
		let node = FakeNode::new();
		node.set_latest_block(None);
		let reader = SnapshotReader::new(node.service(), 1, false);

		let err = reader.read_snapshot(BlockTag::Latest).await.unwrap_err();
		assert!(matches!(err, CycleError::ChainEmpty(tag) if tag == "latest"));
	}

	#[tokio::test]
	async fn test_pending_pool_sampling() {
		let node = FakeNode::new();
		node.set_latest_block(Some(block_json(100, 3)));
		node.set_pending_block(Some(block_json(101, 7)));

		let reader = SnapshotReader::new(node.service(), 1, true);
		let snapshot = reader.read_snapshot(BlockTag::Latest).await.unwrap();
		assert_eq!(snapshot.block_number, 100);
		assert_eq!(snapshot.pending_pool_size, Some(7));

		// A failing secondary read leaves the field empty
		node.set_pending_error(Some(DeliveryError::Network("refused".into())));
		let snapshot = reader.read_snapshot(BlockTag::Latest).await.unwrap();
		assert_eq!(snapshot.pending_pool_size, None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_stalled_node_is_transient() {
		let node = FakeNode::new();
		node.stall_blocks(Duration::from_secs(30));
		let reader = SnapshotReader::new(node.service(), 1, false);

		let err = reader.read_snapshot(BlockTag::Latest).await.unwrap_err();
		assert!(matches!(err, CycleError::Transient(_)));
	}
}
