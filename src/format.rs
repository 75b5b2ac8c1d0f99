//! Human-readable sizes and timestamps shared by the leaf file format and listings.

use crate::error::CacheError;
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use std::fmt::Write;

/// Timestamp layout used in leaf files: `YYYYMMDD-HHMMSS`, always UTC.
pub const TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

const KILO: u64 = 1024;
const MEGA: u64 = KILO * 1024;
const GIGA: u64 = MEGA * 1024;
const TERA: u64 = GIGA * 1024;

/// Render a byte count with a 1024-based suffix, e.g. `512`, `3k`, `12M`, `1.5T`.
pub fn size_to_string(n: u64) -> String {
    if n < KILO {
        format!("{}", n)
    } else if n < MEGA {
        format!("{}k", n / KILO)
    } else if n < GIGA {
        format!("{}M", n / MEGA)
    } else if n < TERA {
        format!("{}G", n / GIGA)
    } else {
        format!("{:.1}T", n as f64 / TERA as f64)
    }
}

/// Parse `<n>[kKmMgGtT]` into bytes.
pub fn parse_size(s: &str) -> Result<u64, CacheError> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], KILO),
        Some('m') | Some('M') => (&s[..s.len() - 1], MEGA),
        Some('g') | Some('G') => (&s[..s.len() - 1], GIGA),
        Some('t') | Some('T') => (&s[..s.len() - 1], TERA),
        _ => (s, 1),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| CacheError::ConfigError(format!("Invalid size '{}'", s)))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| CacheError::ConfigError(format!("Size out of range '{}'", s)))
}

fn utc(t: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(t, 0)
        .single()
        .unwrap_or_default()
}

pub fn time_to_string(t: i64) -> String {
    utc(t).format(TIME_FORMAT).to_string()
}

pub fn parse_time(s: &str) -> Result<i64, CacheError> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|e| CacheError::InvalidRecord(format!("bad timestamp '{}': {}", s, e)))
}

/// Escape a fixed leaf-file field so it holds no whitespace: `%` and any
/// whitespace character become `%XX` per UTF-8 byte.
pub fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == '%' || c.is_whitespace() {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{:02X}", b);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Inverse of [`escape_field`].
pub fn unescape_field(field: &str) -> Result<String, CacheError> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = field
                .get(i + 1..i + 3)
                .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| CacheError::InvalidRecord(format!("bad escape in '{}'", field)))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| CacheError::InvalidRecord(format!("bad escape in '{}'", field)))
}

/// Day stamp naming deletion logs, `YYYYMMDD`.
pub fn date_stamp(t: i64) -> String {
    utc(t).format("%Y%m%d").to_string()
}

/// Short date for listings.
pub fn date_to_string(t: i64) -> String {
    utc(t).format("%Y-%m-%d").to_string()
}

/// ISO week of `t` as `isoyear * 100 + week`, monotonic in `t`.
pub fn week_of(t: i64) -> u32 {
    let week = utc(t).iso_week();
    week.year().max(0) as u32 * 100 + week.week()
}
