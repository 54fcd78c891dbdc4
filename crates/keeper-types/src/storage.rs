//! Storage namespaces for the keeper system.

use std::str::FromStr;

/// Storage namespaces for the keeper's data collections.
///
/// Replaces string literals in storage calls with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Time series of chain metric samples, one per block.
	MetricSamples,
	/// Work items keyed by their external id.
	WorkItems,
	/// Write-ahead journal of dispatch attempts keyed by work item id.
	DispatchAttempts,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::MetricSamples => "metric_samples",
			StorageKey::WorkItems => "work_items",
			StorageKey::DispatchAttempts => "dispatch_attempts",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::MetricSamples, Self::WorkItems, Self::DispatchAttempts].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"metric_samples" => Ok(Self::MetricSamples),
			"work_items" => Ok(Self::WorkItems),
			"dispatch_attempts" => Ok(Self::DispatchAttempts),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
