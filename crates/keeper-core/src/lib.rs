//! Core control loop of the gas keeper.
//!
//! Each poll cycle reads the latest block, records it as a metric sample,
//! asks the congestion policy whether the suggested gas price is low enough,
//! and if so dispatches every pending work item as a signed transaction.
//!
//! The crate is organized leaves first:
//! - [`snapshot`] normalizes raw node blocks into [`keeper_types::ChainSnapshot`]s
//! - [`metrics`] persists snapshots idempotently
//! - [`policy`] is the pure dispatch decision
//! - [`state`] owns the work item lifecycle
//! - [`deposits`] discovers work from the deposit contract
//! - [`dispatch`] builds, signs, journals and submits transactions
//! - [`recovery`] reconciles journaled attempts and confirms submissions
//! - [`engine`] drives the cycle on a timer
//! - [`builder`] wires everything from configuration

pub mod builder;
pub mod deposits;
pub mod dispatch;
pub mod engine;
pub mod metrics;
pub mod policy;
pub mod recovery;
pub mod snapshot;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{BuilderError, KeeperBuilder, KeeperFactories};
pub use dispatch::{DispatchError, Dispatcher};
pub use engine::{CycleOutcome, CycleReport, EngineError, KeeperEngine};
pub use state::{RegistryError, WorkRegistry};

use keeper_delivery::DeliveryError;
use thiserror::Error;

/// Errors that end a poll cycle before any dispatch happens.
#[derive(Debug, Error)]
pub enum CycleError {
	/// Timeout or connection failure; the next cycle retries.
	#[error("Transient node error: {0}")]
	Transient(String),
	/// The node returned a block with missing or non-numeric fields.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
	/// The node returned null for the requested block.
	#[error("Chain returned no block for tag '{0}'")]
	ChainEmpty(String),
	/// The metric sample or a registry read could not be persisted.
	#[error("Persistence error: {0}")]
	Persistence(String),
}

impl From<DeliveryError> for CycleError {
	fn from(err: DeliveryError) -> Self {
		match err {
			DeliveryError::MalformedResponse(msg) => CycleError::MalformedResponse(msg),
			other => CycleError::Transient(other.to_string()),
		}
	}
}
