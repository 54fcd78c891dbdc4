//! SQLite storage backend.
//!
//! Metric samples and work items get dedicated tables so they stay
//! queryable with plain SQL: samples are unique per `(chain_id,
//! block_number)` and work items carry an indexed `status` column. Any other
//! key lands in a generic `kv_store` table. Conditional writes map to single
//! statements (`INSERT OR IGNORE`, `UPDATE ... WHERE value = ?`), so SQLite's
//! own locking makes them atomic across processes.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use keeper_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};
use std::str::FromStr;
use tokio::sync::OnceCell;

const CREATE_TABLES: &str = r#"
	CREATE TABLE IF NOT EXISTS kv_store (
		key TEXT PRIMARY KEY,
		value BLOB NOT NULL,
		updated_at_ms INTEGER NOT NULL
	);
	CREATE TABLE IF NOT EXISTS metric_samples (
		chain_id INTEGER NOT NULL,
		block_number INTEGER NOT NULL,
		value BLOB NOT NULL,
		updated_at_ms INTEGER NOT NULL,
		UNIQUE (chain_id, block_number)
	);
	CREATE TABLE IF NOT EXISTS work_items (
		id INTEGER PRIMARY KEY,
		status TEXT,
		value BLOB NOT NULL,
		updated_at_ms INTEGER NOT NULL
	);
	CREATE INDEX IF NOT EXISTS work_items_status ON work_items (status);
"#;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Row a storage key resolves to.
#[derive(Debug, PartialEq)]
enum Location {
	Sample { chain_id: i64, block_number: i64 },
	WorkItem { id: i64 },
	Kv { key: String },
}

impl Location {
	fn resolve(key: &str) -> Self {
		let (namespace, id) = key.split_once(':').unwrap_or((key, ""));
		match StorageKey::from_str(namespace) {
			Ok(StorageKey::MetricSamples) => {
				let parsed = id
					.split_once(':')
					.and_then(|(chain, block)| Some((chain.parse().ok()?, block.parse().ok()?)));
				if let Some((chain_id, block_number)) = parsed {
					return Location::Sample {
						chain_id,
						block_number,
					};
				}
			},
			Ok(StorageKey::WorkItems) => {
				if let Ok(id) = id.parse() {
					return Location::WorkItem { id };
				}
			},
			_ => {},
		}
		Location::Kv {
			key: key.to_string(),
		}
	}

	fn table(&self) -> &'static str {
		match self {
			Location::Sample { .. } => "metric_samples",
			Location::WorkItem { .. } => "work_items",
			Location::Kv { .. } => "kv_store",
		}
	}

	fn key_columns(&self) -> &'static str {
		match self {
			Location::Sample { .. } => "chain_id, block_number",
			Location::WorkItem { .. } => "id",
			Location::Kv { .. } => "key",
		}
	}

	fn key_predicate(&self) -> &'static str {
		match self {
			Location::Sample { .. } => "chain_id = ? AND block_number = ?",
			Location::WorkItem { .. } => "id = ?",
			Location::Kv { .. } => "key = ?",
		}
	}

	/// Column list and placeholders for a full-row insert, key first.
	fn insert_columns(&self) -> (&'static str, &'static str) {
		match self {
			Location::Sample { .. } => (
				"chain_id, block_number, value, updated_at_ms",
				"?, ?, ?, ?",
			),
			Location::WorkItem { .. } => ("id, value, status, updated_at_ms", "?, ?, ?, ?"),
			Location::Kv { .. } => ("key, value, updated_at_ms", "?, ?, ?"),
		}
	}

	/// Assignments matching the binding order of [`Location::bind_payload`].
	fn payload_assignments(&self) -> &'static str {
		match self {
			Location::WorkItem { .. } => "value = ?, status = ?, updated_at_ms = ?",
			_ => "value = ?, updated_at_ms = ?",
		}
	}

	fn bind_key<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
		match self {
			Location::Sample {
				chain_id,
				block_number,
			} => query.bind(*chain_id).bind(*block_number),
			Location::WorkItem { id } => query.bind(*id),
			Location::Kv { key } => query.bind(key.clone()),
		}
	}

	fn bind_payload<'q>(&self, query: SqliteQuery<'q>, value: Vec<u8>) -> SqliteQuery<'q> {
		let status = match self {
			Location::WorkItem { .. } => Some(work_status(&value)),
			_ => None,
		};
		let query = query.bind(value);
		let query = match status {
			Some(status) => query.bind(status),
			None => query,
		};
		query.bind(now_ms())
	}
}

/// Status field of a serialized work item, if the payload has one.
fn work_status(value: &[u8]) -> Option<String> {
	serde_json::from_slice::<serde_json::Value>(value)
		.ok()?
		.get("status")?
		.as_str()
		.map(str::to_string)
}

/// True when some key could start with both `prefix` and `namespace`.
fn prefix_overlaps(prefix: &str, namespace: &str) -> bool {
	prefix.starts_with(namespace) || namespace.starts_with(prefix)
}

/// SQLite-backed storage.
///
/// The pool connects lazily; the tables are created on first use.
pub struct SqliteStorage {
	pool: SqlitePool,
	schema_ready: OnceCell<()>,
}

impl SqliteStorage {
	pub fn from_pool(pool: SqlitePool) -> Self {
		Self {
			pool,
			schema_ready: OnceCell::new(),
		}
	}

	async fn pool(&self) -> Result<&SqlitePool, StorageError> {
		self.schema_ready
			.get_or_try_init(|| async {
				sqlx::raw_sql(CREATE_TABLES)
					.execute(&self.pool)
					.await
					.map(|_| ())
					.map_err(backend_error)
			})
			.await?;
		Ok(&self.pool)
	}
}

fn backend_error(e: sqlx::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl StorageInterface for SqliteStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let location = Location::resolve(key);
		let sql = format!(
			"SELECT value FROM {} WHERE {}",
			location.table(),
			location.key_predicate()
		);
		let row = location
			.bind_key(sqlx::query(&sql))
			.fetch_optional(self.pool().await?)
			.await
			.map_err(backend_error)?;

		row.map(|r| r.get::<Vec<u8>, _>("value"))
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let location = Location::resolve(key);
		let (columns, placeholders) = location.insert_columns();
		let sql = format!(
			"INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
			 ON CONFLICT({key}) DO UPDATE SET {assignments}",
			table = location.table(),
			key = location.key_columns(),
			assignments = location.payload_assignments(),
		);
		// The upsert branch rebinds the payload
		let query = location.bind_payload(location.bind_key(sqlx::query(&sql)), value.clone());
		location
			.bind_payload(query, value)
			.execute(self.pool().await?)
			.await
			.map_err(backend_error)?;
		Ok(())
	}

	async fn set_bytes_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
		let location = Location::resolve(key);
		let (columns, placeholders) = location.insert_columns();
		let sql = format!(
			"INSERT OR IGNORE INTO {} ({}) VALUES ({})",
			location.table(),
			columns,
			placeholders
		);
		let result = location
			.bind_payload(location.bind_key(sqlx::query(&sql)), value)
			.execute(self.pool().await?)
			.await
			.map_err(backend_error)?;
		Ok(result.rows_affected() == 1)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let location = Location::resolve(key);
		let sql = format!(
			"UPDATE {} SET {} WHERE {} AND value = ?",
			location.table(),
			location.payload_assignments(),
			location.key_predicate()
		);
		let pool = self.pool().await?;
		let result = location
			.bind_key(location.bind_payload(sqlx::query(&sql), value))
			.bind(expected.to_vec())
			.execute(pool)
			.await
			.map_err(backend_error)?;

		if result.rows_affected() == 1 {
			return Ok(true);
		}
		// Distinguish a stale version from a missing key
		if self.exists(key).await? {
			Ok(false)
		} else {
			Err(StorageError::NotFound)
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let location = Location::resolve(key);
		let sql = format!(
			"DELETE FROM {} WHERE {}",
			location.table(),
			location.key_predicate()
		);
		location
			.bind_key(sqlx::query(&sql))
			.execute(self.pool().await?)
			.await
			.map_err(backend_error)?;
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let location = Location::resolve(key);
		let sql = format!(
			"SELECT 1 FROM {} WHERE {}",
			location.table(),
			location.key_predicate()
		);
		let row = location
			.bind_key(sqlx::query(&sql))
			.fetch_optional(self.pool().await?)
			.await
			.map_err(backend_error)?;
		Ok(row.is_some())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let pool = self.pool().await?;
		let mut keys = Vec::new();

		let samples = format!("{}:", StorageKey::MetricSamples.as_str());
		if prefix_overlaps(prefix, &samples) {
			let rows = sqlx::query("SELECT chain_id, block_number FROM metric_samples")
				.fetch_all(pool)
				.await
				.map_err(backend_error)?;
			keys.extend(rows.into_iter().map(|r| {
				format!(
					"{}{}:{}",
					samples,
					r.get::<i64, _>("chain_id"),
					r.get::<i64, _>("block_number")
				)
			}));
		}

		let work_items = format!("{}:", StorageKey::WorkItems.as_str());
		if prefix_overlaps(prefix, &work_items) {
			let rows = sqlx::query("SELECT id FROM work_items")
				.fetch_all(pool)
				.await
				.map_err(backend_error)?;
			keys.extend(
				rows.into_iter()
					.map(|r| format!("{}{}", work_items, r.get::<i64, _>("id"))),
			);
		}

		// substr comparison avoids LIKE wildcard escaping
		let rows = sqlx::query("SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1")
			.bind(prefix)
			.fetch_all(pool)
			.await
			.map_err(backend_error)?;
		keys.extend(rows.into_iter().map(|r| r.get::<String, _>("key")));

		keys.retain(|key| key.starts_with(prefix));
		keys.sort();
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(SqliteStorageSchema)
	}
}

/// Configuration schema for SqliteStorage.
pub struct SqliteStorageSchema;

impl ConfigSchema for SqliteStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("database_url", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(url) if url.starts_with("sqlite:") => Ok(()),
					_ => Err("database_url must start with 'sqlite:'".to_string()),
				}
			})],
			vec![Field::new(
				"max_connections",
				FieldType::Integer {
					min: Some(1),
					max: Some(32),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create a SQLite storage backend.
///
/// Configuration parameters:
/// - `database_url`: e.g. `sqlite://data/keeper.db` or `sqlite::memory:`
/// - `max_connections`: pool size (default: 4, forced to 1 for in-memory databases)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	SqliteStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let database_url = config
		.get("database_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("database_url is required".into()))?;
	let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
	let max_connections = if in_memory {
		1
	} else {
		config
			.get("max_connections")
			.and_then(|v| v.as_integer())
			.unwrap_or(4) as u32
	};

	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| StorageError::Configuration(e.to_string()))?
		.create_if_missing(true);

	// In-memory databases vanish with their last connection
	let pool = SqlitePoolOptions::new()
		.max_connections(max_connections)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_lazy_with(options);

	Ok(Box::new(SqliteStorage::from_pool(pool)))
}

/// Registry for the SQLite storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "sqlite";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
