//! Congestion policy.
//!
//! The dispatch decision compares the node's suggested gas price against the
//! configured threshold. It carries no state between cycles.

use keeper_types::{ChainSnapshot, DispatchDecision};
use rust_decimal::Decimal;

/// Decides whether the current gas price allows dispatching.
///
/// Favorable iff `observed <= threshold`. The observed price is the node's
/// suggested gas price for this cycle, not the snapshot's base fee; the
/// snapshot only anchors the decision to the block it was taken at.
pub fn decide(
	snapshot: &ChainSnapshot,
	observed_price_gwei: Decimal,
	threshold_gwei: Decimal,
) -> DispatchDecision {
	DispatchDecision {
		block_number: snapshot.block_number,
		favorable: observed_price_gwei <= threshold_gwei,
		observed_price_gwei,
		threshold_gwei,
		margin_gwei: threshold_gwei - observed_price_gwei,
	}
}

/// Logs anomalies in a snapshot. Returns `true` if any were found.
///
/// Anomalous snapshots are still recorded.
pub fn check_anomalies(snapshot: &ChainSnapshot) -> bool {
	if snapshot.is_over_capacity() {
		tracing::warn!(
			block_number = snapshot.block_number,
			gas_used = snapshot.gas_used,
			gas_limit = snapshot.gas_limit,
			"Block reports more gas used than its limit"
		);
		return true;
	}
	false
}
