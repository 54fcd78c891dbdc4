//! Work item lifecycle types.
//!
//! A work item is one queued dispatchable action (a pending deposit). It is
//! created as `Pending`, moves to `Submitted` once its transaction has been
//! accepted by the node, and ends in `Confirmed` or `Failed`.

use crate::delivery::TransactionHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
	/// Waiting for a favorable dispatch window.
	Pending,
	/// A transaction for the item was accepted by the node.
	Submitted,
	/// The submitted transaction was mined successfully.
	Confirmed,
	/// Dispatch was rejected or the transaction reverted.
	Failed,
}

impl WorkStatus {
	/// Returns the storage string for this status.
	pub fn as_str(&self) -> &'static str {
		match self {
			WorkStatus::Pending => "pending",
			WorkStatus::Submitted => "submitted",
			WorkStatus::Confirmed => "confirmed",
			WorkStatus::Failed => "failed",
		}
	}

	/// Terminal statuses never transition again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, WorkStatus::Confirmed | WorkStatus::Failed)
	}
}

impl fmt::Display for WorkStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for WorkStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"submitted" => Ok(Self::Submitted),
			"confirmed" => Ok(Self::Confirmed),
			"failed" => Ok(Self::Failed),
			other => Err(format!("Unknown work status: {}", other)),
		}
	}
}

/// One queued dispatchable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
	/// Externally assigned, stable identifier (the deposit id).
	pub id: u64,
	pub status: WorkStatus,
	/// When the last dispatch attempt was made.
	pub last_attempt_at: Option<DateTime<Utc>>,
	/// Hash of the last submitted transaction.
	pub last_tx_reference: Option<TransactionHash>,
	/// Why the item failed, for terminal failures.
	pub failure_reason: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl WorkItem {
	/// Creates a new pending work item.
	pub fn new(id: u64) -> Self {
		let now = Utc::now();
		Self {
			id,
			status: WorkStatus::Pending,
			last_attempt_at: None,
			last_tx_reference: None,
			failure_reason: None,
			created_at: now,
			updated_at: now,
		}
	}
}

/// Write-ahead record of a dispatch attempt.
///
/// Persisted before the signed transaction is sent so that an attempt whose
/// outcome was never recorded can be reconciled against the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAttempt {
	pub item_id: u64,
	pub nonce: u64,
	pub tx_hash: TransactionHash,
	pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_new_item_is_pending() {
		let item = WorkItem::new(7);
		assert_eq!(item.status, WorkStatus::Pending);
		assert!(item.last_tx_reference.is_none());
		assert_eq!(item.created_at, item.updated_at);
	}

	#[test]
	fn test_status_round_trips_through_str() {
		for status in [
			WorkStatus::Pending,
			WorkStatus::Submitted,
			WorkStatus::Confirmed,
			WorkStatus::Failed,
		] {
			assert_eq!(status.as_str().parse::<WorkStatus>().unwrap(), status);
		}
		assert!("queued".parse::<WorkStatus>().is_err());
	}

	#[test]
	fn test_terminal_statuses() {
		assert!(!WorkStatus::Pending.is_terminal());
		assert!(!WorkStatus::Submitted.is_terminal());
		assert!(WorkStatus::Confirmed.is_terminal());
		assert!(WorkStatus::Failed.is_terminal());
	}
}
