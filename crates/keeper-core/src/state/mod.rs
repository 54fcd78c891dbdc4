//! Work item state management.
//!
//! The registry owns the work item lifecycle and persists every transition
//! with compare-and-set, so concurrent dispatchers cannot both move the same
//! item forward.

pub mod work;

pub use work::{RegistryError, WorkRegistry};
