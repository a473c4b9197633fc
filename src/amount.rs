use crate::error::{Error, Result};

/// Convert a decimal token amount such as `"0.1"` into base units with
/// `decimals` fractional digits. Exact: no floating point involved.
pub fn to_base_units(amount: &str, decimals: u32) -> Result<u128> {
	let invalid = |why: &str| Error::InvalidInput(format!("invalid amount {amount:?}: {why}"));

	let amount_trimmed = amount.trim();
	let (whole, frac) = match amount_trimmed.split_once('.') {
		Some((w, f)) => (w, f),
		None => (amount_trimmed, ""),
	};

	if whole.is_empty() && frac.is_empty() {
		return Err(invalid("empty"));
	}
	if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
		return Err(invalid("expected a non-negative decimal number"));
	}
	if frac.len() > decimals as usize {
		return Err(invalid(&format!("at most {decimals} decimal places are supported")));
	}

	let scale = 10u128
		.checked_pow(decimals)
		.ok_or_else(|| invalid("too many decimals"))?;
	let whole: u128 = if whole.is_empty() {
		0
	} else {
		whole.parse().map_err(|_| invalid("too large"))?
	};
	let frac_units: u128 = if frac.is_empty() {
		0
	} else {
		let padded = format!("{frac:0<width$}", width = decimals as usize);
		padded.parse().map_err(|_| invalid("too large"))?
	};

	whole
		.checked_mul(scale)
		.and_then(|w| w.checked_add(frac_units))
		.ok_or_else(|| invalid("too large"))
}

/// Like [`to_base_units`] but the result must fit the 64-bit amounts
/// used by UTXO outputs.
pub fn to_base_units_u64(amount: &str, decimals: u32) -> Result<u64> {
	let units = to_base_units(amount, decimals)?;
	u64::try_from(units)
		.map_err(|_| Error::InvalidInput(format!("amount {amount:?} does not fit in 64 bits")))
}
