//! Human byte sizes with binary multiples (`512M`, `1.5G`).

use crate::error::{XenError, XenResult};

const UNITS: [(char, u64); 4] = [
    ('T', 1 << 40),
    ('G', 1 << 30),
    ('M', 1 << 20),
    ('k', 1 << 10),
];

/// Parse `512M`, `2g`, `1.5GiB`, `4096` into bytes.
pub fn parse_bytes(raw: &str) -> XenResult<u64> {
    let s = raw.trim();
    let lower = s.to_ascii_lowercase();
    let s = if lower.ends_with("ib") {
        &s[..s.len() - 2]
    } else if lower.ends_with('b') {
        &s[..s.len() - 1]
    } else {
        s
    };

    let (number, multiplier) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let unit = UNITS
                .iter()
                .find(|(u, _)| u.eq_ignore_ascii_case(&c))
                .ok_or_else(|| XenError::invalid_input(format!("unknown size unit in '{raw}'")))?;
            (&s[..s.len() - c.len_utf8()], unit.1)
        }
        _ => (s, 1),
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| XenError::invalid_input(format!("invalid size '{raw}'")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(XenError::invalid_input(format!("invalid size '{raw}'")));
    }
    let bytes = value * multiplier as f64;
    if bytes > u64::MAX as f64 {
        return Err(XenError::invalid_input(format!("size '{raw}' is too large")));
    }
    Ok(bytes.round() as u64)
}

/// Largest unit with value ≥ 1, one decimal, `.0` dropped.
///
/// Rounding can carry a value up to the next unit (`1048575` is `1M`).
pub fn format_bytes(bytes: u64) -> String {
    for (i, (unit, size)) in UNITS.iter().enumerate() {
        if bytes < *size {
            continue;
        }
        let tenths = (bytes as f64 / *size as f64 * 10.0).round();
        let (unit, tenths) = match i.checked_sub(1).map(|up| UNITS[up]) {
            Some((larger, _)) if tenths >= 10240.0 => (larger, (tenths / 1024.0).round()),
            _ => (*unit, tenths),
        };
        let scaled = format!("{:.1}", tenths / 10.0);
        let scaled = scaled.strip_suffix(".0").unwrap_or(&scaled);
        return format!("{scaled}{unit}");
    }
    bytes.to_string()
}
