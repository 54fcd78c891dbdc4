//! Chain observation types.
//!
//! A [`ChainSnapshot`] is the normalized view of one block as read from the
//! node during a poll. A [`MetricSample`] is the persisted form of a snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block tag requested from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
	/// The most recently mined block.
	Latest,
	/// The block currently being assembled from the node's mempool.
	Pending,
}

impl BlockTag {
	/// Returns the JSON-RPC string for this tag.
	pub fn as_str(&self) -> &'static str {
		match self {
			BlockTag::Latest => "latest",
			BlockTag::Pending => "pending",
		}
	}
}

impl fmt::Display for BlockTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Normalized, immutable view of one block.
///
/// Fee values are held in gwei as exact decimals. `gas_used <= gas_limit` is
/// expected but not enforced; upstream nodes occasionally report transient
/// inconsistencies and those snapshots are flagged, not rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
	/// Chain the block was read from.
	pub chain_id: u64,
	/// Block height.
	pub block_number: u64,
	/// Block timestamp.
	pub timestamp: DateTime<Utc>,
	/// Base fee per gas in gwei. Zero on chains without a base fee.
	pub base_fee_gwei: Decimal,
	/// Gas consumed by the block.
	pub gas_used: u64,
	/// Gas limit of the block.
	pub gas_limit: u64,
	/// Number of transactions in the block.
	pub transaction_count: u64,
	/// Mean priority fee in gwei over transactions that declare one.
	pub average_priority_fee_gwei: Option<Decimal>,
	/// Transaction count of the pending block, when sampled.
	pub pending_pool_size: Option<u64>,
}

impl ChainSnapshot {
	/// Returns true when the block reports more gas used than its limit.
	pub fn is_over_capacity(&self) -> bool {
		self.gas_used > self.gas_limit
	}

	/// Fraction of the gas limit consumed, as an exact decimal.
	///
	/// Returns zero when the gas limit is zero.
	pub fn utilization(&self) -> Decimal {
		if self.gas_limit == 0 {
			return Decimal::ZERO;
		}
		Decimal::from(self.gas_used) / Decimal::from(self.gas_limit)
	}

	/// Storage identity of the sample derived from this snapshot.
	pub fn sample_id(&self) -> String {
		format!("{}:{}", self.chain_id, self.block_number)
	}
}

/// Persisted metric row: a snapshot plus the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
	#[serde(flatten)]
	pub snapshot: ChainSnapshot,
	/// When the sample was recorded by the keeper.
	pub inserted_at: DateTime<Utc>,
}

impl MetricSample {
	/// Wraps a snapshot into a sample stamped with the current time.
	pub fn new(snapshot: ChainSnapshot) -> Self {
		Self {
			snapshot,
			inserted_at: Utc::now(),
		}
	}
}
