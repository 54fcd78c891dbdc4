//! Common types module for the gas keeper system.
//!
//! This module defines the data types shared by every keeper crate: chain
//! snapshots and metric samples, work items and their lifecycle, transaction
//! payloads, and the configuration validation framework used by pluggable
//! implementations.

/// Chain observation types: block tags, snapshots and metric samples.
pub mod chain;
/// Per-cycle dispatch decision produced by the congestion policy.
pub mod decision;
/// Transaction types for signing, submission and receipts.
pub mod delivery;
/// Base trait for self-registering implementations.
pub mod registry;
/// Secure string wrapper for private keys.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Hex, unit and formatting helpers.
pub mod utils;
/// Configuration validation types for implementation tables.
pub mod validation;
/// Work item lifecycle types.
pub mod work;

pub use chain::*;
pub use decision::*;
pub use delivery::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::*;
pub use utils::{
	parse_quantity, truncate_id, wei_to_gwei, with_0x_prefix, without_0x_prefix,
};
pub use validation::*;
pub use work::*;

/// Re-exported so downstream crates name addresses and amounts through one path.
pub use alloy::primitives::{Address, U256};
