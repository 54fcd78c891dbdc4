//! Transaction dispatch for eligible work items.
//!
//! Each item gets one `sendWhenGasLow` transaction priced at the cycle's
//! observed gas price. The sequence per attempt is: fetch the pending nonce,
//! reserve it, sign, journal, submit, then record the submission on the work
//! item. A nonce conflict is retried immediately with a fresh nonce; any
//! other failure ends the item's turn for this cycle. Nonces released by
//! failed items and not reused within the round are filled with zero-value
//! self-transfers so later submissions are not stuck behind them.

pub mod journal;
pub mod nonce;

pub use journal::DispatchJournal;
pub use nonce::NonceReservation;

use crate::deposits::send_when_gas_low_calldata;
use crate::state::WorkRegistry;
use chrono::Utc;
use keeper_account::AccountService;
use keeper_delivery::{DeliveryError, DeliveryService};
use keeper_types::{
	truncate_id, Address, BlockTag, DispatchAttempt, TransactionHash, TransactionRequest, WorkItem,
	U256,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument;

/// Errors that end one item's dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
	/// Node unreachable or timed out; the item stays pending.
	#[error("Transient error: {0}")]
	Transient(String),
	/// Nonce conflicts persisted past the retry limit; the item stays pending.
	#[error("Nonce conflict: {0}")]
	NonceConflict(String),
	/// Terminal: the item was marked failed.
	#[error("Insufficient funds: {0}")]
	InsufficientFunds(String),
	/// Terminal: the item was marked failed.
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	/// A journal or status write failed. After submission this leaves the
	/// attempt ambiguous until reconciled.
	#[error("Persistence error: {0}")]
	Persistence(String),
	#[error("Signing error: {0}")]
	Signing(String),
}

impl DispatchError {
	/// Whether the item was moved to a terminal failed state.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			DispatchError::InsufficientFunds(_) | DispatchError::Rejected(_)
		)
	}
}

/// Transaction parameters shared by every dispatch.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
	pub chain_id: u64,
	pub contract: Address,
	pub gas_limit: u64,
	pub max_nonce_retries: u32,
	pub max_concurrent_dispatches: usize,
}

/// Counts for one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
	pub attempted: usize,
	pub submitted: usize,
	/// Items moved to failed.
	pub failed: usize,
	/// Items left pending or ambiguous for a later cycle.
	pub deferred: usize,
	/// Released nonces filled with a self-transfer.
	pub gaps_filled: usize,
}

/// Gas for a plain value transfer.
const TRANSFER_GAS: u64 = 21_000;

/// Builds, signs and submits transactions for work items.
pub struct Dispatcher {
	delivery: Arc<DeliveryService>,
	account: Arc<AccountService>,
	registry: Arc<WorkRegistry>,
	journal: Arc<DispatchJournal>,
	sender: Address,
	settings: DispatchSettings,
}

impl Dispatcher {
	pub fn new(
		delivery: Arc<DeliveryService>,
		account: Arc<AccountService>,
		registry: Arc<WorkRegistry>,
		journal: Arc<DispatchJournal>,
		sender: Address,
		settings: DispatchSettings,
	) -> Self {
		Self {
			delivery,
			account,
			registry,
			journal,
			sender,
			settings,
		}
	}

	/// Dispatches every item, at most `max_concurrent_dispatches` at a time.
	///
	/// Items are started in the given order. One item's failure never stops
	/// the others.
	pub async fn dispatch_all(
		self: &Arc<Self>,
		items: Vec<WorkItem>,
		gas_price_wei: u128,
	) -> DispatchSummary {
		let nonces = Arc::new(NonceReservation::new());
		let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_dispatches.max(1)));
		let mut tasks = JoinSet::new();
		let mut summary = DispatchSummary {
			attempted: items.len(),
			..Default::default()
		};

		for item in items {
			let permit = match semaphore.clone().acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => {
					tracing::error!("Dispatch semaphore closed");
					summary.deferred += 1;
					continue;
				},
			};
			let dispatcher = Arc::clone(self);
			let nonces = nonces.clone();
			tasks.spawn(async move {
				let result = dispatcher.dispatch(&item, gas_price_wei, &nonces).await;
				drop(permit);
				(item.id, result)
			});
		}

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((item_id, Ok(tx_hash))) => {
					tracing::info!(
						item_id,
						tx_hash = %truncate_id(&tx_hash.to_string()),
						"Dispatched work item"
					);
					summary.submitted += 1;
				},
				Ok((item_id, Err(e))) if e.is_terminal() => {
					tracing::warn!(item_id, error = %e, "Work item failed");
					summary.failed += 1;
				},
				Ok((item_id, Err(e))) => {
					tracing::warn!(item_id, error = %e, "Work item deferred");
					summary.deferred += 1;
				},
				Err(e) => {
					tracing::error!(error = %e, "Dispatch task aborted");
					summary.deferred += 1;
				},
			}
		}

		for nonce in nonces.take_gaps().await {
			match self.fill_gap(nonce, gas_price_wei).await {
				Ok(Some(tx_hash)) => {
					tracing::info!(
						nonce,
						tx_hash = %truncate_id(&tx_hash.to_string()),
						"Filled nonce gap"
					);
					summary.gaps_filled += 1;
				},
				Ok(None) => tracing::debug!(nonce, "Nonce gap already consumed"),
				Err(e) => tracing::error!(nonce, error = %e, "Failed to fill nonce gap"),
			}
		}
		summary
	}

	/// Sends a zero-value transfer to the keeper itself at `nonce`.
	///
	/// Returns `None` when the nonce is already consumed on chain.
	async fn fill_gap(
		&self,
		nonce: u64,
		gas_price_wei: u128,
	) -> Result<Option<TransactionHash>, DispatchError> {
		let mined = self
			.delivery
			.get_nonce(self.sender, BlockTag::Latest)
			.await
			.map_err(|e| DispatchError::Transient(e.to_string()))?;
		if mined > nonce {
			return Ok(None);
		}

		let request = TransactionRequest {
			chain_id: self.settings.chain_id,
			nonce,
			to: self.sender,
			data: Vec::new(),
			value: U256::ZERO,
			gas_limit: TRANSFER_GAS,
			gas_price: gas_price_wei,
		};
		let signed = self
			.account
			.sign(&request)
			.await
			.map_err(|e| DispatchError::Signing(e.to_string()))?;

		match self.delivery.submit(&signed).await {
			Ok(tx_hash) => Ok(Some(tx_hash)),
			Err(DeliveryError::AlreadyKnown(_)) => Ok(Some(signed.hash)),
			Err(DeliveryError::NonceConflict(_)) => Ok(None),
			Err(e) => Err(DispatchError::Transient(e.to_string())),
		}
	}

	/// Dispatches one item and records the submission.
	#[instrument(skip_all, fields(item_id = item.id))]
	pub async fn dispatch(
		&self,
		item: &WorkItem,
		gas_price_wei: u128,
		nonces: &NonceReservation,
	) -> Result<TransactionHash, DispatchError> {
		let data = send_when_gas_low_calldata(item.id);
		let mut attempt: u32 = 0;

		loop {
			attempt += 1;
			let node_nonce = self
				.delivery
				.get_nonce(self.sender, BlockTag::Pending)
				.await
				.map_err(|e| DispatchError::Transient(e.to_string()))?;
			let nonce = nonces.reserve(node_nonce).await;

			let request = TransactionRequest {
				chain_id: self.settings.chain_id,
				nonce,
				to: self.settings.contract,
				data: data.clone(),
				value: U256::ZERO,
				gas_limit: self.settings.gas_limit,
				gas_price: gas_price_wei,
			};

			let signed = match self.account.sign(&request).await {
				Ok(signed) => signed,
				Err(e) => {
					nonces.release(nonce).await;
					return Err(DispatchError::Signing(e.to_string()));
				},
			};

			let entry = DispatchAttempt {
				item_id: item.id,
				nonce,
				tx_hash: signed.hash.clone(),
				attempted_at: Utc::now(),
			};
			if let Err(e) = self.journal.record(&entry).await {
				nonces.release(nonce).await;
				return Err(DispatchError::Persistence(format!(
					"Failed to journal attempt: {}",
					e
				)));
			}

			let submitted = match self.delivery.submit(&signed).await {
				Err(DeliveryError::AlreadyKnown(msg)) => {
					tracing::info!(nonce, error = %msg, "Node already holds this transaction");
					Ok(signed.hash.clone())
				},
				other => other,
			};

			match submitted {
				Ok(tx_hash) => {
					self.registry
						.mark_submitted(item.id, tx_hash.clone())
						.await
						.map_err(|e| {
							// Journal entry stays; reconciliation resolves it
							DispatchError::Persistence(format!(
								"Submitted {} but failed to record it: {}",
								tx_hash, e
							))
						})?;
					self.clear_journal(item.id).await;
					return Ok(tx_hash);
				},
				Err(DeliveryError::NonceConflict(msg)) => {
					self.clear_journal(item.id).await;
					if attempt >= self.settings.max_nonce_retries {
						return Err(DispatchError::NonceConflict(msg));
					}
					tracing::warn!(nonce, attempt, error = %msg, "Nonce conflict, retrying");
				},
				Err(DeliveryError::InsufficientFunds(msg)) => {
					self.clear_journal(item.id).await;
					nonces.release(nonce).await;
					self.fail_item(item.id, &format!("insufficient funds: {}", msg))
						.await?;
					return Err(DispatchError::InsufficientFunds(msg));
				},
				Err(DeliveryError::Rejected(msg)) => {
					self.clear_journal(item.id).await;
					nonces.release(nonce).await;
					self.fail_item(item.id, &format!("rejected: {}", msg)).await?;
					return Err(DispatchError::Rejected(msg));
				},
				// Transport failures and underpriced replacements leave it unknown
				// whether this transaction will be mined; the journal entry is kept
				// for reconciliation
				Err(e) => return Err(DispatchError::Transient(e.to_string())),
			}
		}
	}

	async fn fail_item(&self, item_id: u64, reason: &str) -> Result<(), DispatchError> {
		self.registry
			.mark_failed(item_id, reason)
			.await
			.map(|_| ())
			.map_err(|e| DispatchError::Persistence(e.to_string()))
	}

	async fn clear_journal(&self, item_id: u64) {
		if let Err(e) = self.journal.remove(item_id).await {
			tracing::warn!(item_id, error = %e, "Failed to clear journal entry");
		}
	}
}
