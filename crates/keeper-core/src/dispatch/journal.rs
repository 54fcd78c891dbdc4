//! Write-ahead journal of dispatch attempts.
//!
//! An entry is written after signing and before submission, and removed once
//! the outcome is recorded on the work item. An entry that survives a cycle
//! marks an attempt whose outcome is unknown.

use keeper_storage::{StorageError, StorageService};
use keeper_types::{DispatchAttempt, StorageKey};
use std::sync::Arc;

/// Journal of in-flight dispatch attempts, one entry per work item.
pub struct DispatchJournal {
	storage: Arc<StorageService>,
}

impl DispatchJournal {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn record(&self, attempt: &DispatchAttempt) -> Result<(), StorageError> {
		self.storage
			.store(
				StorageKey::DispatchAttempts.as_str(),
				&attempt.item_id.to_string(),
				attempt,
			)
			.await
	}

	/// Removes the entry for an item. Removing a missing entry is not an error.
	pub async fn remove(&self, item_id: u64) -> Result<(), StorageError> {
		match self
			.storage
			.remove(StorageKey::DispatchAttempts.as_str(), &item_id.to_string())
			.await
		{
			Ok(()) | Err(StorageError::NotFound) => Ok(()),
			Err(e) => Err(e),
		}
	}

	/// All outstanding entries, ascending by item id.
	pub async fn entries(&self) -> Result<Vec<DispatchAttempt>, StorageError> {
		let mut entries: Vec<DispatchAttempt> = self
			.storage
			.retrieve_all::<DispatchAttempt>(StorageKey::DispatchAttempts.as_str())
			.await?
			.into_iter()
			.map(|(_, attempt)| attempt)
			.collect();
		entries.sort_by_key(|attempt| attempt.item_id);
		Ok(entries)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::memory_storage;
	use chrono::Utc;
	use keeper_types::TransactionHash;

	fn attempt(item_id: u64, nonce: u64) -> DispatchAttempt {
		DispatchAttempt {
			item_id,
			nonce,
			tx_hash: TransactionHash(vec![item_id as u8; 32]),
			attempted_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_record_replace_and_remove() {
		let journal = DispatchJournal::new(memory_storage());
		journal.record(&attempt(12, 0)).await.unwrap();
		journal.record(&attempt(3, 1)).await.unwrap();
		journal.record(&attempt(3, 2)).await.unwrap();

		let entries = journal.entries().await.unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].item_id, 3);
		assert_eq!(entries[0].nonce, 2);

		journal.remove(3).await.unwrap();
		journal.remove(3).await.unwrap();
		assert_eq!(journal.entries().await.unwrap().len(), 1);
	}
}
