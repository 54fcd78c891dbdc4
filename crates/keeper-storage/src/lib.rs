//! Storage module for the gas keeper.
//!
//! Backends are plain byte key-value stores with two conditional writes:
//! insert-if-absent and compare-and-swap. Everything the keeper persists
//! (metric samples, work items, dispatch attempts) is layered on top of
//! those primitives by [`StorageService`], so a backend never needs to know
//! about the keeper's types.

use async_trait::async_trait;
use keeper_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
	pub mod sqlite;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level interface for storage backends.
///
/// Keys are `namespace:id` strings. The two conditional writes must be atomic
/// with respect to every other write on the same backend instance.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, replacing any existing value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Stores raw bytes only if the key is absent. Returns whether it wrote.
	async fn set_bytes_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError>;

	/// Replaces the value only if it currently equals `expected`.
	///
	/// Returns `Ok(false)` when the stored value differs and
	/// `Err(StorageError::NotFound)` when the key is absent.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists all keys starting with `prefix`, in ascending order.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory, sqlite};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
		(sqlite::Registry::NAME, sqlite::Registry::factory()),
	]
}

/// A value read together with the exact bytes it was decoded from.
///
/// The bytes act as the version for a later [`StorageService::compare_and_swap`].
#[derive(Debug, Clone)]
pub struct Versioned<T> {
	pub value: T,
	version: Vec<u8>,
}

/// High-level storage service that provides typed operations.
///
/// Values are stored as JSON under `namespace:id`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

fn key_for(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.backend
			.set_bytes(&key_for(namespace, id), encode(data)?)
			.await
	}

	/// Stores a value only if nothing is stored under the key yet.
	///
	/// Returns `true` if the value was written.
	pub async fn store_if_absent<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.set_bytes_if_absent(&key_for(namespace, id), encode(data)?)
			.await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key_for(namespace, id)).await?;
		decode(&bytes)
	}

	/// Retrieves a value along with its version for a later compare-and-swap.
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let bytes = self.backend.get_bytes(&key_for(namespace, id)).await?;
		Ok(Versioned {
			value: decode(&bytes)?,
			version: bytes,
		})
	}

	/// Replaces a value only if it is unchanged since `current` was read.
	///
	/// Returns `false` if another writer got there first.
	pub async fn compare_and_swap<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		current: &Versioned<T>,
		data: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.compare_and_swap(&key_for(namespace, id), &current.version, encode(data)?)
			.await
	}

	/// Retrieves every value in a namespace, ordered by key.
	///
	/// Entries that fail to deserialize are returned as errors rather than
	/// skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.list_keys(&prefix).await?;

		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(bytes) => {
					let id = key[prefix.len()..].to_string();
					values.push((id, decode(&bytes)?));
				},
				// Deleted between listing and reading
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key_for(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key_for(namespace, id)).await
	}
}
