use alloy::primitives::{U256, U512};
use eyre::Context as _;

const BPS_DENOMINATOR: u64 = 10_000;

fn pow10_u256(exp: u8) -> eyre::Result<U256> {
    U256::from(10_u64)
        .checked_pow(U256::from(exp))
        .ok_or_else(|| eyre::eyre!("decimals too large"))
}

fn pow10_u512(exp: u32) -> eyre::Result<U512> {
    U512::from(10_u64)
        .checked_pow(U512::from(exp))
        .ok_or_else(|| eyre::eyre!("exponent too large"))
}

/// Parse a human decimal amount (`"1.5"`) into token base units.
pub fn parse_units(s: &str, decimals: u8) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    if s.starts_with('-') {
        eyre::bail!("amount must be non-negative");
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        eyre::bail!("invalid amount: {s}");
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        eyre::bail!("invalid amount: {s}");
    }
    if frac.len() > usize::from(decimals) {
        eyre::bail!("too many decimal places for token (decimals={decimals})");
    }

    let whole_v = if whole.is_empty() {
        U256::ZERO
    } else {
        whole.parse::<U256>().context("parse whole")?
    };

    let mut frac_s = frac.to_owned();
    while frac_s.len() < usize::from(decimals) {
        frac_s.push('0');
    }
    let frac_v = if frac_s.is_empty() {
        U256::ZERO
    } else {
        frac_s.parse::<U256>().context("parse fractional")?
    };

    whole_v
        .checked_mul(pow10_u256(decimals)?)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))
}

/// Format a base-unit amount as a decimal string without floats.
///
/// - `1500000`, 6 decimals => `"1.5"`
/// - `1`, 6 decimals => `"0.000001"`
pub fn format_units(v: U256, decimals: u8) -> eyre::Result<String> {
    if decimals == 0 {
        return Ok(v.to_string());
    }
    let scale = pow10_u256(decimals)?;
    let whole = v / scale;
    let frac = v % scale;
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    Ok(format!(
        "{whole}.{}",
        trim_fraction(&left_pad_zeros(&frac.to_string(), usize::from(decimals)))
    ))
}

fn left_pad_zeros(s: &str, width: usize) -> String {
    let mut out = String::with_capacity(width.max(s.len()));
    for _ in s.len()..width {
        out.push('0');
    }
    out.push_str(s);
    out
}

fn trim_fraction(s: &str) -> &str {
    s.trim_end_matches('0')
}

fn div_round_half_up(a: U512, b: U512) -> U512 {
    let q = a / b;
    let r = a % b;
    if r.saturating_mul(U512::from(2_u64)) >= b {
        q + U512::from(1_u64)
    } else {
        q
    }
}

/// Render `num / den` with `digits` significant digits (round half up), never in
/// exponent notation.
pub fn format_significant(num: U512, den: U512, digits: u32) -> eyre::Result<String> {
    if den.is_zero() {
        eyre::bail!("division by zero");
    }
    if digits == 0 {
        eyre::bail!("significant digits must be positive");
    }
    if num.is_zero() {
        return Ok("0".to_owned());
    }

    let int_part = num / den;
    // Decimal exponent that brings the value to `digits` integer digits.
    let exp: i64 = if int_part.is_zero() {
        let ten = U512::from(10_u64);
        let mut leading = 0_i64;
        let mut n = num;
        while n < den {
            n = n.checked_mul(ten).ok_or_else(|| eyre::eyre!("overflow"))?;
            leading += 1;
        }
        i64::from(digits) + leading - 1
    } else {
        let int_digits = i64::try_from(int_part.to_string().len()).context("digit count")?;
        i64::from(digits) - int_digits
    };

    let scaled = if exp >= 0 {
        let m = pow10_u512(u32::try_from(exp).context("exponent")?)?;
        let n = num.checked_mul(m).ok_or_else(|| eyre::eyre!("overflow"))?;
        div_round_half_up(n, den)
    } else {
        let m = pow10_u512(u32::try_from(-exp).context("exponent")?)?;
        let d = den.checked_mul(m).ok_or_else(|| eyre::eyre!("overflow"))?;
        div_round_half_up(num, d)
    };

    if exp <= 0 {
        let m = pow10_u512(u32::try_from(-exp).context("exponent")?)?;
        return Ok((scaled * m).to_string());
    }

    let places = usize::try_from(exp).context("exponent")?;
    let s = left_pad_zeros(&scaled.to_string(), places + 1);
    let (whole, frac) = s.split_at(s.len() - places);
    let frac = trim_fraction(frac);
    if frac.is_empty() {
        Ok(whole.to_owned())
    } else {
        Ok(format!("{whole}.{frac}"))
    }
}

/// Minimum acceptable output after applying a slippage tolerance in basis points.
pub fn min_out_after_slippage(out: U256, slippage_bps: u32) -> eyre::Result<U256> {
    let bps = u64::from(slippage_bps);
    if bps >= BPS_DENOMINATOR {
        eyre::bail!("slippage must be below 100% (got {slippage_bps} bps)");
    }
    let min = out
        .checked_mul(U256::from(BPS_DENOMINATOR - bps))
        .ok_or_else(|| eyre::eyre!("overflow"))?
        / U256::from(BPS_DENOMINATOR);
    Ok(min)
}
