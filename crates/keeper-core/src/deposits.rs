//! Deposit contract bindings and work discovery.
//!
//! Deposits are numbered from zero up to `getDepositCount()`. A deposit whose
//! on-chain status is still pending becomes a work item; dispatching it calls
//! `sendWhenGasLow(depositId)`.

use crate::state::{RegistryError, WorkRegistry};
use alloy::sol;
use alloy::sol_types::SolCall;
use keeper_delivery::{DeliveryError, DeliveryService};
use keeper_types::{Address, U256};
use std::sync::Arc;
use thiserror::Error;

// Deposit contract ABI subset used by the keeper.
sol! {
	function sendWhenGasLow(uint256 depositId);
	function getDepositCount() returns (uint256);
	function getDeposit(uint256 depositId) returns (
		address depositor,
		address recipient,
		uint256 amount,
		uint256 createdAt,
		uint8 status
	);
}

/// On-chain status value of a deposit awaiting dispatch.
pub const DEPOSIT_STATUS_PENDING: u8 = 0;

/// Calldata that releases one deposit.
pub fn send_when_gas_low_calldata(deposit_id: u64) -> Vec<u8> {
	sendWhenGasLowCall {
		depositId: U256::from(deposit_id),
	}
	.abi_encode()
}

/// Errors that can occur while syncing deposits.
#[derive(Debug, Error)]
pub enum DepositError {
	#[error("Node error: {0}")]
	Node(#[from] DeliveryError),
	#[error("Failed to decode contract response: {0}")]
	Decode(String),
	#[error("Registry error: {0}")]
	Registry(#[from] RegistryError),
}

/// Result of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
	/// Deposits whose status was read from the contract.
	pub scanned: u64,
	/// Newly registered work items.
	pub registered: u64,
}

/// Reads the deposit contract and registers pending deposits as work.
pub struct DepositSource {
	delivery: Arc<DeliveryService>,
	contract: Address,
}

impl DepositSource {
	pub fn new(delivery: Arc<DeliveryService>, contract: Address) -> Self {
		Self { delivery, contract }
	}

	/// Number of deposits ever created on the contract.
	pub async fn deposit_count(&self) -> Result<u64, DepositError> {
		let raw = self
			.delivery
			.call(self.contract, getDepositCountCall {}.abi_encode())
			.await?;
		let count = getDepositCountCall::abi_decode_returns(&raw)
			.map_err(|e| DepositError::Decode(e.to_string()))?;
		u64::try_from(count).map_err(|_| DepositError::Decode(format!("deposit count {} exceeds u64", count)))
	}

	/// On-chain status of one deposit.
	pub async fn deposit_status(&self, deposit_id: u64) -> Result<u8, DepositError> {
		let call = getDepositCall {
			depositId: U256::from(deposit_id),
		};
		let raw = self.delivery.call(self.contract, call.abi_encode()).await?;
		let deposit = getDepositCall::abi_decode_returns(&raw)
			.map_err(|e| DepositError::Decode(e.to_string()))?;
		Ok(deposit.status)
	}

	/// Registers every pending deposit not yet known to the registry.
	///
	/// Ids already registered are skipped without a contract read, so the
	/// cost of a sync is proportional to new deposits.
	pub async fn sync(&self, registry: &WorkRegistry) -> Result<SyncReport, DepositError> {
		let count = self.deposit_count().await?;
		let mut report = SyncReport::default();

		for deposit_id in 0..count {
			if registry.contains(deposit_id).await? {
				continue;
			}

			report.scanned += 1;
			let status = self.deposit_status(deposit_id).await?;
			if status != DEPOSIT_STATUS_PENDING {
				continue;
			}
			if registry.register(deposit_id).await? {
				report.registered += 1;
			}
		}

		tracing::debug!(
			deposit_count = count,
			scanned = report.scanned,
			registered = report.registered,
			"Synced deposits"
		);
		Ok(report)
	}
}
