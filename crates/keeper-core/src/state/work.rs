//! Work registry implementation.
//!
//! Items move Pending -> Submitted -> Confirmed, or end in Failed from either
//! Pending (terminal dispatch error) or Submitted (reverted transaction).

use chrono::Utc;
use keeper_storage::{StorageError, StorageService};
use keeper_types::{StorageKey, TransactionHash, WorkItem, WorkStatus};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during work item management.
#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Work item not found: {0}")]
	NotFound(u64),
	#[error("Invalid transition for item {id} from {from} to {to}")]
	InvalidTransition {
		id: u64,
		from: WorkStatus,
		to: WorkStatus,
	},
	/// Another writer changed the item between read and write.
	#[error("Concurrent update of work item {0}")]
	Conflict(u64),
}

fn storage_error(id: u64, err: StorageError) -> RegistryError {
	match err {
		StorageError::NotFound => RegistryError::NotFound(id),
		other => RegistryError::Storage(other.to_string()),
	}
}

/// Checks a transition against the static lifecycle table.
fn is_valid_transition(from: WorkStatus, to: WorkStatus) -> bool {
	static TRANSITIONS: Lazy<HashMap<WorkStatus, HashSet<WorkStatus>>> = Lazy::new(|| {
		let mut m = HashMap::new();
		m.insert(
			WorkStatus::Pending,
			HashSet::from([WorkStatus::Submitted, WorkStatus::Failed]),
		);
		m.insert(
			WorkStatus::Submitted,
			HashSet::from([WorkStatus::Confirmed, WorkStatus::Failed]),
		);
		m.insert(WorkStatus::Confirmed, HashSet::new()); // terminal
		m.insert(WorkStatus::Failed, HashSet::new()); // terminal
		m
	});

	TRANSITIONS
		.get(&from)
		.is_some_and(|allowed| allowed.contains(&to))
}

/// Owns work items and their lifecycle transitions.
pub struct WorkRegistry {
	storage: Arc<StorageService>,
}

impl WorkRegistry {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Registers a new pending item. Returns `false` if the id is already known,
	/// whatever its status.
	pub async fn register(&self, id: u64) -> Result<bool, RegistryError> {
		let created = self
			.storage
			.store_if_absent(
				StorageKey::WorkItems.as_str(),
				&id.to_string(),
				&WorkItem::new(id),
			)
			.await
			.map_err(|e| storage_error(id, e))?;

		if created {
			tracing::info!(item_id = id, "Registered work item");
		}
		Ok(created)
	}

	/// Whether an item with this id has been registered.
	pub async fn contains(&self, id: u64) -> Result<bool, RegistryError> {
		self.storage
			.exists(StorageKey::WorkItems.as_str(), &id.to_string())
			.await
			.map_err(|e| storage_error(id, e))
	}

	pub async fn get(&self, id: u64) -> Result<WorkItem, RegistryError> {
		self.storage
			.retrieve(StorageKey::WorkItems.as_str(), &id.to_string())
			.await
			.map_err(|e| storage_error(id, e))
	}

	/// Items with the given status, ascending by id.
	pub async fn list_by_status(&self, status: WorkStatus) -> Result<Vec<WorkItem>, RegistryError> {
		let mut items: Vec<WorkItem> = self
			.storage
			.retrieve_all::<WorkItem>(StorageKey::WorkItems.as_str())
			.await
			.map_err(|e| RegistryError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, item)| item)
			.filter(|item| item.status == status)
			.collect();

		// Storage orders keys as strings; "10" sorts before "9"
		items.sort_by_key(|item| item.id);
		Ok(items)
	}

	/// Items eligible for dispatch: pending, ascending by id.
	pub async fn list_eligible(&self) -> Result<Vec<WorkItem>, RegistryError> {
		self.list_by_status(WorkStatus::Pending).await
	}

	/// Moves a pending item to submitted, recording the transaction.
	pub async fn mark_submitted(
		&self,
		id: u64,
		tx_reference: TransactionHash,
	) -> Result<WorkItem, RegistryError> {
		self.transition(id, WorkStatus::Submitted, |item| {
			item.last_attempt_at = Some(Utc::now());
			item.last_tx_reference = Some(tx_reference);
		})
		.await
	}

	/// Moves an item to failed with a reason.
	pub async fn mark_failed(&self, id: u64, reason: &str) -> Result<WorkItem, RegistryError> {
		self.transition(id, WorkStatus::Failed, |item| {
			item.failure_reason = Some(reason.to_string());
		})
		.await
	}

	/// Moves a submitted item to confirmed.
	pub async fn mark_confirmed(&self, id: u64) -> Result<WorkItem, RegistryError> {
		self.transition(id, WorkStatus::Confirmed, |_| {}).await
	}

	/// Validates and applies a transition with a single compare-and-set.
	///
	/// A concurrent writer makes the swap fail with [`RegistryError::Conflict`];
	/// the caller decides whether to re-read.
	async fn transition<F>(&self, id: u64, to: WorkStatus, update: F) -> Result<WorkItem, RegistryError>
	where
		F: FnOnce(&mut WorkItem),
	{
		let key = id.to_string();
		let current = self
			.storage
			.retrieve_versioned::<WorkItem>(StorageKey::WorkItems.as_str(), &key)
			.await
			.map_err(|e| storage_error(id, e))?;

		let from = current.value.status;
		if !is_valid_transition(from, to) {
			return Err(RegistryError::InvalidTransition { id, from, to });
		}

		let mut item = current.value.clone();
		item.status = to;
		update(&mut item);
		item.updated_at = Utc::now();

		let swapped = self
			.storage
			.compare_and_swap(StorageKey::WorkItems.as_str(), &key, &current, &item)
			.await
			.map_err(|e| storage_error(id, e))?;
		if !swapped {
			return Err(RegistryError::Conflict(id));
		}

		tracing::info!(item_id = id, from = %from, to = %to, "Work item transitioned");
		Ok(item)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::memory_storage;

	fn hash(byte: u8) -> TransactionHash {
		TransactionHash(vec![byte; 32])
	}

	#[test]
	fn test_transition_table() {
		assert!(is_valid_transition(WorkStatus::Pending, WorkStatus::Submitted));
		assert!(is_valid_transition(WorkStatus::Pending, WorkStatus::Failed));
		assert!(is_valid_transition(WorkStatus::Submitted, WorkStatus::Confirmed));
		assert!(is_valid_transition(WorkStatus::Submitted, WorkStatus::Failed));
		assert!(!is_valid_transition(WorkStatus::Pending, WorkStatus::Confirmed));
		assert!(!is_valid_transition(WorkStatus::Submitted, WorkStatus::Submitted));
		assert!(!is_valid_transition(WorkStatus::Confirmed, WorkStatus::Failed));
		assert!(!is_valid_transition(WorkStatus::Failed, WorkStatus::Pending));
	}

	#[tokio::test]
	async fn test_register_is_idempotent() {
		let registry = WorkRegistry::new(memory_storage());
		assert!(registry.register(1).await.unwrap());
		registry.mark_submitted(1, hash(1)).await.unwrap();

		// Re-registering never resets a known item
		assert!(!registry.register(1).await.unwrap());
		assert_eq!(registry.get(1).await.unwrap().status, WorkStatus::Submitted);
	}

	#[tokio::test]
	async fn test_eligible_items_sorted_numerically() {
		let registry = WorkRegistry::new(memory_storage());
		for id in [10, 2, 9, 1] {
			registry.register(id).await.unwrap();
		}
		registry.mark_failed(9, "rejected").await.unwrap();

		let ids: Vec<u64> = registry
			.list_eligible()
			.await
			.unwrap()
			.iter()
			.map(|item| item.id)
			.collect();
		assert_eq!(ids, vec![1, 2, 10]);

		let failed = registry.list_by_status(WorkStatus::Failed).await.unwrap();
		assert_eq!(failed.len(), 1);
		assert_eq!(failed[0].failure_reason.as_deref(), Some("rejected"));
	}

	#[tokio::test]
	async fn test_submitted_twice_is_invalid() {
		let registry = WorkRegistry::new(memory_storage());
		registry.register(1).await.unwrap();

		let item = registry.mark_submitted(1, hash(1)).await.unwrap();
		assert_eq!(item.last_tx_reference, Some(hash(1)));
		assert!(item.last_attempt_at.is_some());

		assert!(matches!(
			registry.mark_submitted(1, hash(2)).await,
			Err(RegistryError::InvalidTransition {
				from: WorkStatus::Submitted,
				to: WorkStatus::Submitted,
				..
			})
		));
	}

	#[tokio::test]
	async fn test_concurrent_submit_has_one_winner() {
		let registry = Arc::new(WorkRegistry::new(memory_storage()));
		registry.register(1).await.unwrap();

		let mut handles = Vec::new();
		for byte in 0..8u8 {
			let registry = registry.clone();
			handles.push(tokio::spawn(async move {
				registry.mark_submitted(1, hash(byte)).await
			}));
		}

		let mut winners = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => winners += 1,
				Err(RegistryError::Conflict(1)) | Err(RegistryError::InvalidTransition { .. }) => {},
				Err(e) => panic!("unexpected error: {}", e),
			}
		}
		assert_eq!(winners, 1);
	}

	#[tokio::test]
	async fn test_confirm_and_terminal_states() {
		let registry = WorkRegistry::new(memory_storage());
		registry.register(1).await.unwrap();

		assert!(registry.mark_confirmed(1).await.is_err());
		registry.mark_submitted(1, hash(1)).await.unwrap();
		registry.mark_confirmed(1).await.unwrap();
		assert!(registry.mark_failed(1, "late").await.is_err());

		assert!(matches!(
			registry.mark_submitted(42, hash(1)).await,
			Err(RegistryError::NotFound(42))
		));
	}
}
