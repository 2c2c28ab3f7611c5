//! Duration parsing and media timescale conversion.

use crate::{Error, Result};
use chrono::TimeDelta;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Parse a duration given either as (possibly fractional) seconds or as a
/// unit-suffixed string such as `1h2m3.5s` or `300ms`.
///
/// # Examples
///
/// ```
/// use chrono::TimeDelta;
/// use tapedeck_common::time::parse_duration;
///
/// assert_eq!(parse_duration("60").unwrap(), TimeDelta::seconds(60));
/// assert_eq!(parse_duration("1.5").unwrap(), TimeDelta::milliseconds(1500));
/// assert_eq!(parse_duration("1m30s").unwrap(), TimeDelta::seconds(90));
/// ```
pub fn parse_duration(raw: &str) -> Result<TimeDelta> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::invalid_input("empty duration"));
    }

    if let Ok(secs) = raw.parse::<f64>() {
        return seconds_to_delta(secs)
            .ok_or_else(|| Error::invalid_input(format!("invalid duration: {}", raw)));
    }

    parse_unit_duration(raw)
        .ok_or_else(|| Error::invalid_input(format!("invalid duration: {}", raw)))
}

fn seconds_to_delta(secs: f64) -> Option<TimeDelta> {
    if !secs.is_finite() {
        return None;
    }
    let nanos = (secs * 1e9).round();
    if nanos.abs() > i64::MAX as f64 {
        return None;
    }
    Some(TimeDelta::nanoseconds(nanos as i64))
}

fn parse_unit_duration(raw: &str) -> Option<TimeDelta> {
    let (negative, mut rest) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };

    if rest == "0" {
        return Some(TimeDelta::zero());
    }
    if rest.is_empty() {
        return None;
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot.bytes().take_while(|b| b.is_ascii_digit()).count();
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale: i128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => return None,
        };

        let whole: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        total = total.checked_add(whole.checked_mul(scale)?)?;

        if !frac_part.is_empty() {
            // Keep at most 18 fractional digits; anything finer is below a nanosecond at every unit.
            let digits = &frac_part[..frac_part.len().min(18)];
            let numerator: i128 = digits.parse().ok()?;
            let denominator = 10i128.pow(digits.len() as u32);
            total = total.checked_add(numerator * scale / denominator)?;
        }
    }

    if negative {
        total = -total;
    }
    i64::try_from(total).ok().map(TimeDelta::nanoseconds)
}

/// Convert a wall-clock duration into ticks of a media timescale.
///
/// Rounds toward negative infinity so that a tick never lies past the instant.
pub fn to_timescale(delta: TimeDelta, timescale: u32) -> i64 {
    let nanos = delta
        .num_nanoseconds()
        .map(i128::from)
        .unwrap_or_else(|| i128::from(delta.num_seconds()) * NANOS_PER_SEC);
    let ticks = (nanos * i128::from(timescale)).div_euclid(NANOS_PER_SEC);
    ticks.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Convert media timescale ticks into a wall-clock duration.
pub fn from_timescale(ticks: i64, timescale: u32) -> TimeDelta {
    if timescale == 0 {
        return TimeDelta::zero();
    }
    let nanos = (i128::from(ticks) * NANOS_PER_SEC).div_euclid(i128::from(timescale));
    TimeDelta::nanoseconds(nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

/// Format a duration as fractional seconds for logs and JSON.
pub fn as_secs_f64(delta: TimeDelta) -> f64 {
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => delta.num_seconds() as f64,
    }
}
