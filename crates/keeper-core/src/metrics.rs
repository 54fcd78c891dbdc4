//! Metric sample persistence.

use crate::CycleError;
use keeper_storage::StorageService;
use keeper_types::{ChainSnapshot, MetricSample, StorageKey};
use std::sync::Arc;

/// Appends one sample per block to the metric time series.
pub struct MetricsRecorder {
	storage: Arc<StorageService>,
}

impl MetricsRecorder {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Records a snapshot. Returns `true` if a new row was written and
	/// `false` if the block was already recorded.
	pub async fn record(&self, snapshot: &ChainSnapshot) -> Result<bool, CycleError> {
		let sample_id = snapshot.sample_id();
		let written = self
			.storage
			.store_if_absent(
				StorageKey::MetricSamples.as_str(),
				&sample_id,
				&MetricSample::new(snapshot.clone()),
			)
			.await
			.map_err(|e| CycleError::Persistence(e.to_string()))?;

		if written {
			tracing::debug!(sample_id = %sample_id, "Recorded metric sample");
		} else {
			tracing::debug!(sample_id = %sample_id, "Block already recorded");
		}
		Ok(written)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{failing_storage, memory_storage, snapshot};

	#[tokio::test]
	async fn test_same_block_is_recorded_once() {
		let storage = memory_storage();
		let recorder = MetricsRecorder::new(storage.clone());

		assert!(recorder.record(&snapshot(100)).await.unwrap());
		assert!(!recorder.record(&snapshot(100)).await.unwrap());
		assert!(recorder.record(&snapshot(101)).await.unwrap());

		let rows: Vec<(String, MetricSample)> = storage
			.retrieve_all(StorageKey::MetricSamples.as_str())
			.await
			.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].1.snapshot.block_number, 100);
	}

	#[tokio::test]
	async fn test_write_failure_is_persistence_error() {
		let (storage, flags) = failing_storage();
		flags.fail_inserts(true);
		let recorder = MetricsRecorder::new(storage);

		assert!(matches!(
			recorder.record(&snapshot(1)).await,
			Err(CycleError::Persistence(_))
		));
	}
}
