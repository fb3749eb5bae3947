//! Object metadata keys and mtime encoding helpers.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};

/// Metadata key under which this file system persists explicit mtimes.
/// Values are UTC, formatted as RFC 3339 with nanosecond precision.
pub const MTIME_METADATA_KEY: &str = "gcsfuse_mtime";

/// Legacy metadata key written by upload tools: Unix seconds as a base-0
/// integer literal. Read-only compatibility.
pub const LEGACY_MTIME_METADATA_KEY: &str = "goog-reserved-file-mtime";

/// Format a timestamp the way [`MTIME_METADATA_KEY`] stores it.
pub fn format_mtime(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a [`MTIME_METADATA_KEY`] value.
pub fn parse_mtime(s: &str) -> Result<SystemTime, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(SystemTime::from)
}

/// Convert Unix seconds to a `SystemTime`, allowing pre-epoch values.
pub fn system_time_from_unix_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Parse an integer literal with base auto-detection: `0x`/`0X` hex,
/// `0o`/`0O` octal, `0b`/`0B` binary, a bare leading `0` octal, decimal
/// otherwise. Underscore digit separators are permitted.
pub fn parse_base0_int(s: &str) -> Option<i64> {
    let (negative, rest) = match s.as_bytes().first()? {
        b'+' => (false, &s[1..]),
        b'-' => (true, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        (8, oct)
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, bin)
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };

    let digits = if digits.contains('_') {
        std::borrow::Cow::Owned(digits.replace('_', ""))
    } else {
        std::borrow::Cow::Borrowed(digits)
    };
    if digits.is_empty() {
        return None;
    }

    let magnitude = i64::from_str_radix(&digits, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}
