//! Configuration validation for pluggable implementation tables.
//!
//! Each storage backend, account and node client receives its configuration
//! as a raw TOML table. Implementations describe the shape they expect with a
//! [`Schema`] and validate the table before constructing themselves.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	/// A required field is missing.
	#[error("Missing required field: {0}")]
	MissingField(String),
	/// A field has an invalid value.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	/// A field has the wrong TOML type.
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

/// Type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// Integer with optional inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// Nested table with its own schema.
	Table(Schema),
}

/// Custom validator run after the type check.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field in a schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Adds a custom validator that returns an error message on failure.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		validate_field_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of a TOML table.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML value against this schema.
	///
	/// The value must be a table; every required field must be present and
	/// every present field must match its declared type and validator.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn type_mismatch(field_name: &str, expected: &str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: field_name.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

fn validate_field_type(
	field_name: &str,
	value: &toml::Value,
	expected_type: &FieldType,
) -> Result<(), ValidationError> {
	match expected_type {
		FieldType::String => {
			if !value.is_str() {
				return Err(type_mismatch(field_name, "string", value));
			}
		},
		FieldType::Integer { min, max } => {
			let int_val = value
				.as_integer()
				.ok_or_else(|| type_mismatch(field_name, "integer", value))?;

			if let Some(min_val) = min {
				if int_val < *min_val {
					return Err(ValidationError::InvalidValue {
						field: field_name.to_string(),
						message: format!("Value {} is less than minimum {}", int_val, min_val),
					});
				}
			}
			if let Some(max_val) = max {
				if int_val > *max_val {
					return Err(ValidationError::InvalidValue {
						field: field_name.to_string(),
						message: format!("Value {} is greater than maximum {}", int_val, max_val),
					});
				}
			}
		},
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(type_mismatch(field_name, "boolean", value));
			}
		},
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| match e {
				ValidationError::MissingField(f) => {
					ValidationError::MissingField(format!("{}.{}", field_name, f))
				},
				ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
					field: format!("{}.{}", field_name, field),
					message,
				},
				ValidationError::TypeMismatch {
					field,
					expected,
					actual,
				} => ValidationError::TypeMismatch {
					field: format!("{}.{}", field_name, field),
					expected,
					actual,
				},
			})?;
		},
	}

	Ok(())
}

/// A configuration schema that can validate an implementation's TOML table.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table(src: &str) -> toml::Value {
		toml::from_str(src).unwrap()
	}

	fn sqlite_like_schema() -> Schema {
		Schema::new(
			vec![Field::new("database_url", FieldType::String).with_validator(|v| {
				if v.as_str().is_some_and(|s| s.starts_with("sqlite:")) {
					Ok(())
				} else {
					Err("must be a sqlite: url".to_string())
				}
			})],
			vec![Field::new(
				"max_connections",
				FieldType::Integer {
					min: Some(1),
					max: Some(64),
				},
			)],
		)
	}

	#[test]
	fn test_valid_table_passes() {
		let schema = sqlite_like_schema();
		schema
			.validate(&table("database_url = \"sqlite::memory:\"\nmax_connections = 4"))
			.unwrap();
	}

	#[test]
	fn test_missing_required_field() {
		let err = sqlite_like_schema().validate(&table("max_connections = 4")).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(f) if f == "database_url"));
	}

	#[test]
	fn test_integer_bounds_and_custom_validator() {
		let schema = sqlite_like_schema();
		let err = schema
			.validate(&table("database_url = \"sqlite::memory:\"\nmax_connections = 0"))
			.unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { .. }));

		let err = schema
			.validate(&table("database_url = \"postgres://x\""))
			.unwrap_err();
		assert!(err.to_string().contains("sqlite"));
	}

	#[test]
	fn test_nested_table_errors_are_prefixed() {
		let schema = Schema::new(
			vec![Field::new(
				"inner",
				FieldType::Table(Schema::new(vec![Field::new("flag", FieldType::Boolean)], vec![])),
			)],
			vec![],
		);
		let err = schema.validate(&table("[inner]\nflag = 1")).unwrap_err();
		assert!(matches!(err, ValidationError::TypeMismatch { field, .. } if field == "inner.flag"));
	}
}
