//! Reconciliation of dispatch attempts with chain state.
//!
//! Two passes run against the node:
//! - the journal pass resolves attempts whose outcome was never recorded,
//!   before any item is dispatched again;
//! - the confirmation pass moves submitted items to confirmed or failed once
//!   their receipt is available.

use crate::dispatch::DispatchJournal;
use crate::state::{RegistryError, WorkRegistry};
use keeper_delivery::DeliveryService;
use keeper_types::{truncate_id, Address, BlockTag, DispatchAttempt, WorkStatus};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Registry error: {0}")]
	Registry(#[from] RegistryError),
	#[error("Delivery error: {0}")]
	Delivery(String),
}

/// How one journaled attempt was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileResult {
	/// A receipt exists; the item was marked submitted.
	Submitted,
	/// The item already moved on; the entry was stale.
	Stale,
	/// The nonce was consumed by another transaction, or the node no longer
	/// holds the attempt; the item may be dispatched again.
	Released,
	/// Still in the node's pool; the item must not be dispatched.
	InFlight,
}

/// Report of one journal pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
	pub submitted: usize,
	pub released: usize,
	pub stale: usize,
	/// Items with an unresolved attempt, excluded from dispatch this cycle.
	pub in_flight: HashSet<u64>,
}

/// Report of one confirmation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationReport {
	pub confirmed: usize,
	pub reverted: usize,
	pub unmined: usize,
}

/// Resolves journaled attempts and confirms submitted items.
pub struct RecoveryService {
	delivery: Arc<DeliveryService>,
	registry: Arc<WorkRegistry>,
	journal: Arc<DispatchJournal>,
	sender: Address,
}

impl RecoveryService {
	pub fn new(
		delivery: Arc<DeliveryService>,
		registry: Arc<WorkRegistry>,
		journal: Arc<DispatchJournal>,
		sender: Address,
	) -> Self {
		Self {
			delivery,
			registry,
			journal,
			sender,
		}
	}

	/// Resolves every journal entry against the chain.
	///
	/// Account nonces are read before any receipt, so a transaction mined
	/// between the two reads is seen through its receipt rather than
	/// mistaken for a consumed nonce.
	#[instrument(skip_all)]
	pub async fn reconcile(&self) -> Result<ReconcileReport, RecoveryError> {
		let entries = self
			.journal
			.entries()
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;

		let mut report = ReconcileReport::default();
		if entries.is_empty() {
			return Ok(report);
		}

		let mined_nonce = self
			.delivery
			.get_nonce(self.sender, BlockTag::Latest)
			.await
			.map_err(|e| RecoveryError::Delivery(e.to_string()))?;
		let pending_nonce = self
			.delivery
			.get_nonce(self.sender, BlockTag::Pending)
			.await
			.map_err(|e| RecoveryError::Delivery(e.to_string()))?;

		for entry in entries {
			let result = self.reconcile_entry(&entry, mined_nonce, pending_nonce).await?;
			tracing::info!(
				item_id = entry.item_id,
				nonce = entry.nonce,
				tx_hash = %truncate_id(&entry.tx_hash.to_string()),
				result = ?result,
				"Reconciled dispatch attempt"
			);

			match result {
				ReconcileResult::Submitted => report.submitted += 1,
				ReconcileResult::Stale => report.stale += 1,
				ReconcileResult::Released => report.released += 1,
				ReconcileResult::InFlight => {
					report.in_flight.insert(entry.item_id);
					continue;
				},
			}
			self.journal
				.remove(entry.item_id)
				.await
				.map_err(|e| RecoveryError::Storage(e.to_string()))?;
		}
		Ok(report)
	}

	async fn reconcile_entry(
		&self,
		entry: &DispatchAttempt,
		mined_nonce: u64,
		pending_nonce: u64,
	) -> Result<ReconcileResult, RecoveryError> {
		let item = match self.registry.get(entry.item_id).await {
			Ok(item) => item,
			Err(RegistryError::NotFound(_)) => return Ok(ReconcileResult::Stale),
			Err(e) => return Err(e.into()),
		};
		if item.status != WorkStatus::Pending {
			return Ok(ReconcileResult::Stale);
		}

		let receipt = self
			.delivery
			.get_receipt(&entry.tx_hash)
			.await
			.map_err(|e| RecoveryError::Delivery(e.to_string()))?;
		if receipt.is_some() {
			// A reverted receipt is handled by the confirmation pass
			self.registry
				.mark_submitted(entry.item_id, entry.tx_hash.clone())
				.await?;
			return Ok(ReconcileResult::Submitted);
		}

		if mined_nonce > entry.nonce || pending_nonce <= entry.nonce {
			return Ok(ReconcileResult::Released);
		}
		Ok(ReconcileResult::InFlight)
	}

	/// Checks receipts of submitted items.
	///
	/// Per-item failures are logged and retried next cycle.
	#[instrument(skip_all)]
	pub async fn confirm_submitted(&self) -> Result<ConfirmationReport, RecoveryError> {
		let submitted = self.registry.list_by_status(WorkStatus::Submitted).await?;
		let mut report = ConfirmationReport::default();

		for item in submitted {
			let Some(tx_hash) = item.last_tx_reference.as_ref() else {
				tracing::warn!(item_id = item.id, "Submitted item has no transaction reference");
				continue;
			};

			let receipt = match self.delivery.get_receipt(tx_hash).await {
				Ok(receipt) => receipt,
				Err(e) => {
					tracing::warn!(item_id = item.id, error = %e, "Failed to fetch receipt");
					continue;
				},
			};

			let outcome = match receipt {
				None => {
					report.unmined += 1;
					continue;
				},
				Some(receipt) if receipt.success => {
					report.confirmed += 1;
					self.registry.mark_confirmed(item.id).await
				},
				Some(_) => {
					report.reverted += 1;
					self.registry.mark_failed(item.id, "transaction reverted").await
				},
			};
			if let Err(e) = outcome {
				tracing::warn!(item_id = item.id, error = %e, "Failed to record confirmation");
			}
		}

		if report.confirmed + report.reverted > 0 {
			tracing::info!(
				confirmed = report.confirmed,
				reverted = report.reverted,
				unmined = report.unmined,
				"Confirmation pass complete"
			);
		}
		Ok(report)
	}
}
