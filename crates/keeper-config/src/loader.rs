//! Loads a configuration file together with the files it includes.
//!
//! A top-level section may appear in exactly one file. The key file is
//! usually kept apart from the rest, e.g. `include = ["account.toml"]`.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Loader for a main configuration file and its includes.
pub struct ConfigLoader {
	/// Relative includes are resolved against this directory
	base_path: PathBuf,
	/// Canonical paths already read, for cycle detection
	loaded_files: HashSet<PathBuf>,
	/// Top-level section name to the file it came from
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads, merges, resolves and validates a configuration file.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = self.resolve_path(config_path)?;
		let main_content = self.load_file(&config_path).await?;
		let mut main_toml: toml::Value = toml::from_str(&main_content)?;

		let includes = extract_includes(&main_toml)?;
		if includes.is_empty() {
			return main_content.parse();
		}

		if let Some(table) = main_toml.as_table_mut() {
			table.remove("include");
			for key in table.keys() {
				self.section_sources.insert(key.clone(), config_path.clone());
			}
		}

		for include in includes {
			let include_path = self.resolve_path(&include)?;
			let content = self.load_file(&include_path).await?;
			let include_toml: toml::Value = toml::from_str(&content)?;
			self.merge_sections(&mut main_toml, include_toml, &include_path)?;
		}

		let combined = toml::to_string(&main_toml).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		combined.parse()
	}

	fn merge_sections(
		&mut self,
		target: &mut toml::Value,
		include: toml::Value,
		source: &Path,
	) -> Result<(), ConfigError> {
		let toml::Value::Table(include_table) = include else {
			return Ok(());
		};
		let Some(target_table) = target.as_table_mut() else {
			return Ok(());
		};

		for (key, value) in include_table {
			if let Some(existing) = self.section_sources.get(&key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}",
					key,
					existing.display(),
					source.display()
				)));
			}
			self.section_sources.insert(key.clone(), source.to_path_buf());
			target_table.insert(key, value);
		}
		Ok(())
	}

	/// Reads a file once and resolves environment variables in it.
	async fn load_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical = tokio::fs::canonicalize(path).await?;
		if !self.loaded_files.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

fn extract_includes(toml: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match toml.get("include") {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.iter()
			.map(|item| {
				item.as_str().map(PathBuf::from).ok_or_else(|| {
					ConfigError::Validation("Include array must contain only strings".into())
				})
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const KEEPER_AND_NETWORK: &str = r#"
[keeper]
id = "test-keeper"
poll_interval_seconds = 15

[network]
chain_id = 1
rpc_url = "http://localhost:8545"
deposit_contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
"#;

	const STORAGE_AND_ACCOUNT: &str = r#"
[storage]
primary = "file"
[storage.implementations.file]
storage_path = "./data"

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let content = format!("{}{}", KEEPER_AND_NETWORK, STORAGE_AND_ACCOUNT);
		fs::write(temp_dir.path().join("keeper.toml"), content).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("keeper.toml").await.unwrap();

		assert_eq!(config.keeper.id, "test-keeper");
		assert_eq!(config.storage.primary, "file");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		let main = format!("include = [\"backends.toml\"]\n{}", KEEPER_AND_NETWORK);
		fs::write(temp_dir.path().join("main.toml"), main).unwrap();
		fs::write(temp_dir.path().join("backends.toml"), STORAGE_AND_ACCOUNT).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("main.toml").await.unwrap();

		assert_eq!(config.keeper.poll_interval_seconds, 15);
		assert_eq!(config.account.primary, "local");
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		let main = format!("include = \"dup.toml\"\n{}", KEEPER_AND_NETWORK);
		fs::write(temp_dir.path().join("main.toml"), main).unwrap();
		fs::write(temp_dir.path().join("dup.toml"), "[keeper]\nid = \"other\"\n").unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Duplicate section 'keeper'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("self.toml"),
			"include = [\"self.toml\"]\n[keeper]\nid = \"loop\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("self.toml").await.unwrap_err();
		assert!(err.to_string().contains("already loaded"));
	}

	#[tokio::test]
	async fn test_missing_file() {
		let temp_dir = TempDir::new().unwrap();
		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("absent.toml").await.unwrap_err();
		assert!(matches!(err, ConfigError::Io(_)));
	}
}
