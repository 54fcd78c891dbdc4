//! Dispatch decision computed once per poll cycle.

use rust_decimal::Decimal;

/// Outcome of the congestion policy for one cycle.
///
/// Never persisted. `margin_gwei` is `threshold - observed`, positive or zero
/// exactly when the decision is favorable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchDecision {
	/// Block the cycle observed when deciding.
	pub block_number: u64,
	pub favorable: bool,
	pub observed_price_gwei: Decimal,
	pub threshold_gwei: Decimal,
	pub margin_gwei: Decimal,
}
