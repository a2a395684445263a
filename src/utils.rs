//! Small parsing and arithmetic helpers shared by storage, the CLI and the function library.

use crate::error::StrataError;
use crate::types::ArchiveSpec;

use std::time::{SystemTime, UNIX_EPOCH};

const UNIT_MULTIPLIERS: [(&str, u64); 6] = [
    ("seconds", 1),
    ("minutes", 60),
    ("hours", 3600),
    ("days", 86_400),
    ("weeks", 86_400 * 7),
    ("years", 86_400 * 365),
];

/// Current wall-clock time in whole seconds since epoch.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Resolves a (possibly abbreviated) retention unit to its length in seconds.
fn retention_unit_seconds(unit: &str) -> Option<u64> {
    if unit.is_empty() {
        return None;
    }
    UNIT_MULTIPLIERS
        .iter()
        .find(|(name, _)| name.starts_with(unit))
        .map(|(_, mult)| *mult)
}

/// Splits `"10min"` into `(10, "min")`. Returns `None` unless it is digits followed by letters.
fn split_quantity(s: &str) -> Option<(u64, &str)> {
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits_end == 0 {
        return None;
    }
    let (num, unit) = s.split_at(digits_end);
    if !unit.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    num.parse().ok().map(|n| (n, unit))
}

/// Parses a retention definition such as `"60:1440"`, `"1m:1d"` or `"10s:6h"`.
///
/// The precision is a number of seconds or a quantity with a unit. The retention is
/// either a bare point count or a duration that is divided by the precision.
pub fn parse_retention_def(def: &str) -> Result<ArchiveSpec, StrataError> {
    let invalid = |msg: String| StrataError::InvalidConfiguration(msg);
    let (precision, points) = def
        .trim()
        .split_once(':')
        .ok_or_else(|| invalid(format!("Invalid retention definition '{}'", def)))?;

    let precision = if precision.chars().all(|c| c.is_ascii_digit()) && !precision.is_empty() {
        precision
            .parse::<u64>()
            .map_err(|_| invalid(format!("Invalid precision specification '{}'", precision)))?
    } else {
        split_quantity(precision)
            .and_then(|(n, unit)| retention_unit_seconds(unit).and_then(|m| n.checked_mul(m)))
            .ok_or_else(|| invalid(format!("Invalid precision specification '{}'", precision)))?
    };
    if precision == 0 {
        return Err(invalid(format!("Precision must be positive in '{}'", def)));
    }

    let points = if points.chars().all(|c| c.is_ascii_digit()) && !points.is_empty() {
        points
            .parse::<u64>()
            .map_err(|_| invalid(format!("Invalid retention specification '{}'", points)))?
    } else {
        split_quantity(points)
            .and_then(|(n, unit)| {
                retention_unit_seconds(unit)
                    .and_then(|m| n.checked_mul(m))
                    .map(|secs| secs / precision)
            })
            .ok_or_else(|| invalid(format!("Invalid retention specification '{}'", points)))?
    };

    let seconds_per_point = u32::try_from(precision)
        .map_err(|_| invalid(format!("Precision too large in '{}'", def)))?;
    let points =
        u32::try_from(points).map_err(|_| invalid(format!("Too many points in '{}'", def)))?;
    Ok(ArchiveSpec::new(seconds_per_point, points))
}

fn offset_unit_seconds(unit: &str) -> Option<i64> {
    let secs = if unit.starts_with('s') {
        1
    } else if unit.starts_with("min") {
        60
    } else if unit.starts_with('h') {
        3600
    } else if unit.starts_with('d') {
        86_400
    } else if unit.starts_with('w') {
        86_400 * 7
    } else if unit.starts_with("mon") {
        86_400 * 30
    } else if unit.starts_with('y') {
        86_400 * 365
    } else {
        return None;
    };
    Some(secs)
}

/// Parses a relative time offset such as `"-1d"`, `"5min"` or `"+2h30min"` into seconds.
///
/// Unsigned offsets are positive. Months are 30 days and years 365 days.
pub fn parse_time_offset(offset: &str) -> Result<i64, StrataError> {
    let bad = || StrataError::ArgumentShape(format!("Invalid time offset '{}'", offset));
    let trimmed = offset.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let (sign, mut rest) = match trimmed.as_bytes()[0] {
        b'+' => (1, &trimmed[1..]),
        b'-' => (-1, &trimmed[1..]),
        b'0'..=b'9' => (1, trimmed),
        _ => return Err(bad()),
    };
    if rest.is_empty() {
        return Err(bad());
    }

    let mut total = 0i64;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(bad());
        }
        let num: i64 = rest[..digits_end].parse().map_err(|_| bad())?;
        rest = &rest[digits_end..];
        let unit_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        let secs = offset_unit_seconds(unit).ok_or_else(bad)?;
        total = num
            .checked_mul(secs)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(bad)?;
    }
    Ok(sign * total)
}

pub fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

pub fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b) * b).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_defs() {
        assert_eq!(parse_retention_def("60:1440").unwrap(), ArchiveSpec::new(60, 1440));
        assert_eq!(parse_retention_def("1m:1d").unwrap(), ArchiveSpec::new(60, 1440));
        assert_eq!(parse_retention_def("10s:6h").unwrap(), ArchiveSpec::new(10, 2160));
        assert_eq!(parse_retention_def("1h:1y").unwrap(), ArchiveSpec::new(3600, 8760));
        assert_eq!(parse_retention_def(" 5min:2w ").unwrap(), ArchiveSpec::new(300, 4032));
    }

    #[test]
    fn bad_retention_defs() {
        for def in [
            "60",
            "x:10",
            "10:x",
            "0:10",
            "10q:5",
            ":",
            "18446744073709551615y:10",
            "1s:18446744073709551615y",
        ] {
            assert!(
                matches!(parse_retention_def(def), Err(StrataError::InvalidConfiguration(_))),
                "{} should be rejected",
                def
            );
        }
    }

    #[test]
    fn time_offsets() {
        assert_eq!(parse_time_offset("-1d").unwrap(), -86_400);
        assert_eq!(parse_time_offset("5min").unwrap(), 300);
        assert_eq!(parse_time_offset("+2h30min").unwrap(), 9000);
        assert_eq!(parse_time_offset("1w").unwrap(), 604_800);
        assert_eq!(parse_time_offset("-1mon").unwrap(), -2_592_000);
        assert_eq!(parse_time_offset("").unwrap(), 0);
        assert!(parse_time_offset("9223372036854775807y").is_err());
        assert!(parse_time_offset("abc").is_err());
        assert!(parse_time_offset("10parsecs").is_err());
        assert!(parse_time_offset("-").is_err());
    }

    #[test]
    fn lcm_of_steps() {
        assert_eq!(lcm(60, 300), 300);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(gcd(12, 18), 6);
    }
}
