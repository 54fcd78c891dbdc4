//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable implementation (storage backend, account, node client)
/// provides a Registry struct that declares the name it is configured under
/// and the factory that builds it.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. "memory" for `storage.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
