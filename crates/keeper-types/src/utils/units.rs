//! Fee unit conversion and hex quantity parsing.
//!
//! Node responses carry fees in wei as hex quantities. The keeper keeps wei
//! as integers internally and converts to gwei `Decimal`s at the boundary;
//! no floating point is involved at any step.

use super::formatting::without_0x_prefix;
use rust_decimal::Decimal;

/// Decodes a JSON-RPC hex quantity ("0x1a") as a big-endian unsigned integer.
///
/// Returns `None` for empty digits, non-hex characters or values wider than
/// 128 bits.
pub fn parse_quantity(quantity: &str) -> Option<u128> {
	let digits = without_0x_prefix(quantity.trim());
	if digits.is_empty() {
		return None;
	}
	u128::from_str_radix(digits, 16).ok()
}

/// Converts an amount in wei to an exact gwei decimal.
///
/// Returns `None` when the amount exceeds the 96-bit decimal mantissa.
pub fn wei_to_gwei(wei: u128) -> Option<Decimal> {
	let wei = i128::try_from(wei).ok()?;
	Decimal::try_from_i128_with_scale(wei, 9)
		.ok()
		.map(|d| d.normalize())
}
