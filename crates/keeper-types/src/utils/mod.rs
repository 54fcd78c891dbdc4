//! Utility functions for hex quantities, fee units and display formatting.

pub mod formatting;
pub mod units;

pub use formatting::{truncate_id, with_0x_prefix, without_0x_prefix};
pub use units::{parse_quantity, wei_to_gwei};
