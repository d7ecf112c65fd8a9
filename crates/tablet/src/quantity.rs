//! Just enough of the resource quantity grammar to compare storage requests.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a quantity into whole units, rounding fractions up. `None` when malformed.
pub fn parse(q: &Quantity) -> Option<i128> {
    parse_str(q.0.trim())
}

pub fn parse_str(s: &str) -> Option<i128> {
    let (negative, rest) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let split = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
    let (num, suffix) = rest.split_at(split);
    let (whole, frac) = num.split_once('.').unwrap_or((num, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    // Exact mantissa: all digits as one integer, scaled down by the fraction length.
    let mut mantissa: i128 = 0;
    for c in whole.chars().chain(frac.chars()) {
        let d = c.to_digit(10)?;
        mantissa = mantissa.checked_mul(10)?.checked_add(d as i128)?;
    }
    let (binary, decimal): (u32, i32) = match suffix {
        "" => (0, 0),
        "Ki" => (1, 0),
        "Mi" => (2, 0),
        "Gi" => (3, 0),
        "Ti" => (4, 0),
        "Pi" => (5, 0),
        "Ei" => (6, 0),
        "m" => (0, -3),
        "k" => (0, 3),
        "M" => (0, 6),
        "G" => (0, 9),
        "T" => (0, 12),
        "P" => (0, 15),
        "E" => (0, 18),
        exp if exp.starts_with(['e', 'E']) => (0, exp[1..].parse::<i32>().ok()?),
        _ => return None,
    };
    let mut v = mantissa.checked_mul(1024i128.checked_pow(binary)?)?;
    let exp = decimal.checked_sub(i32::try_from(frac.len()).ok()?)?;
    if exp >= 0 {
        v = v.checked_mul(10i128.checked_pow(exp as u32)?)?;
    } else {
        let den = 10i128.checked_pow(exp.unsigned_abs())?;
        // Round up.
        v = v / den + i128::from(v % den != 0);
    }
    Some(if negative { -v } else { v })
}

/// Whether two quantities denote the same amount, whatever their spelling.
pub fn same(a: &Quantity, b: &Quantity) -> bool {
    matches!((parse(a), parse(b)), (Some(x), Some(y)) if x == y)
}
