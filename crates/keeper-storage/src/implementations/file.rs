//! File-based storage backend.
//!
//! Each key is one file under the storage directory. Writes go to a temp
//! file that is then renamed over the target, so a crash never leaves a
//! half-written value behind.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use keeper_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

const FILE_EXTENSION: &str = "json";

/// File-based storage implementation.
///
/// Conditional writes are serialized through a process-wide lock, so only
/// one keeper process may use a given directory.
pub struct FileStorage {
	base_path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", encode_key(key), FILE_EXTENSION))
	}

	async fn read_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(self.get_file_path(key)).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn write_file(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		let path = self.get_file_path(key);
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

/// Maps a key to a filesystem-safe, reversible file stem.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			'/' => out.push_str("%2F"),
			':' => out.push_str("%3A"),
			'\\' => out.push_str("%5C"),
			other => out.push(other),
		}
	}
	out
}

fn decode_key(stem: &str) -> String {
	stem.replace("%3A", ":")
		.replace("%2F", "/")
		.replace("%5C", "\\")
		.replace("%25", "%")
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_file(key).await?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write_file(key, value).await
	}

	async fn set_bytes_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		if self.read_file(key).await?.is_some() {
			return Ok(false);
		}
		self.write_file(key, value).await?;
		Ok(true)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		let current = self.read_file(key).await?.ok_or(StorageError::NotFound)?;
		if current != expected {
			return Ok(false);
		}
		self.write_file(key, value).await?;
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				tracing::debug!("Skipping non-UTF-8 file name {:?}", path);
				continue;
			};
			let key = decode_key(stem);
			if key.starts_with(prefix) {
				keys.push(key);
			}
		}
		keys.sort();
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(path) if !path.trim().is_empty() => Ok(()),
					_ => Err("storage_path cannot be empty".to_string()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend.
///
/// Configuration parameters:
/// - `storage_path`: directory holding the data files (default: "./data/keeper")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/keeper");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
