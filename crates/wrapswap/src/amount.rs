use crate::errors::SwapError;
use alloy::primitives::U256;

/// Token decimals supported by the unit converter.
///
/// Each maps to a fixed unit divisor (`10^decimals`): mwei, gwei and ether.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDecimals {
    Six,
    Nine,
    Eighteen,
}

impl TokenDecimals {
    pub const fn places(self) -> usize {
        match self {
            Self::Six => 6,
            Self::Nine => 9,
            Self::Eighteen => 18,
        }
    }

    pub fn divisor(self) -> U256 {
        U256::from(10_u64).pow(U256::from(self.places()))
    }
}

impl TryFrom<u8> for TokenDecimals {
    type Error = SwapError;

    fn try_from(decimals: u8) -> Result<Self, Self::Error> {
        match decimals {
            6 => Ok(Self::Six),
            9 => Ok(Self::Nine),
            18 => Ok(Self::Eighteen),
            other => Err(SwapError::config(format!(
                "unsupported token decimals: {other} (expected 6, 9 or 18)"
            ))),
        }
    }
}

/// Convert a human decimal string (e.g. `"0.01"`) into smallest units.
pub fn to_smallest_unit(amount: &str, decimals: u8) -> Result<U256, SwapError> {
    let decimals = TokenDecimals::try_from(decimals)?;
    let s = amount.trim();
    if s.is_empty() {
        return Err(SwapError::config("empty amount"));
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));

    if whole.starts_with('-') {
        return Err(SwapError::config("amount must be non-negative"));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SwapError::config(format!("invalid amount: {s}")));
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(SwapError::config(format!("invalid amount: {s}")));
    }
    if frac.len() > decimals.places() {
        return Err(SwapError::config(format!(
            "too many decimal places for token (decimals={})",
            decimals.places()
        )));
    }

    let whole_v = parse_digits(whole)?;
    let frac_s = format!("{frac:0<width$}", width = decimals.places());
    let frac_v = parse_digits(&frac_s)?;

    whole_v
        .checked_mul(decimals.divisor())
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| SwapError::config("amount overflow"))
}

/// Format a smallest-unit amount as a human decimal string without using floats.
///
/// - `1_500_000` at 6 decimals => `"1.5"`
/// - `1` at 6 decimals => `"0.000001"`
pub fn from_smallest_unit(value: U256, decimals: u8) -> Result<String, SwapError> {
    let decimals = TokenDecimals::try_from(decimals)?;
    let scale = decimals.divisor();
    let whole = value / scale;
    let frac = value % scale;
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    let frac_s = format!("{frac:0>width$}", frac = frac.to_string(), width = decimals.places());
    Ok(format!("{whole}.{}", frac_s.trim_end_matches('0')))
}

/// Best-effort formatting for log lines; falls back to the raw integer.
pub fn display_units(value: U256, decimals: u8) -> String {
    from_smallest_unit(value, decimals).unwrap_or_else(|_| value.to_string())
}

fn parse_digits(s: &str) -> Result<U256, SwapError> {
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(s, 10).map_err(|e| SwapError::config(format!("parse amount: {e}")))
}
