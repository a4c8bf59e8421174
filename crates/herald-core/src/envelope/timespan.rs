//! TimeSpan-style duration text: `[d.]hh:mm:ss[.fffffff]`.
//!
//! Parsing rules:
//! - Exactly three `:`-separated fields; days prefix and 1..=7 fraction
//!   digits are optional.
//! - Hours < 24, minutes and seconds < 60 (larger spans use the days prefix).
//! - Never panics; malformed text is a `Serialization` error.

use std::time::Duration;

use crate::error::{HeraldError, Result};

const SECS_PER_DAY: u64 = 86_400;
const NANOS_PER_TICK: u32 = 100;

/// Render a duration. Sub-tick precision (below 100ns) is truncated.
pub fn format(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / SECS_PER_DAY;
    let h = (total % SECS_PER_DAY) / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    let ticks = d.subsec_nanos() / NANOS_PER_TICK;

    let mut out = if days > 0 {
        format!("{days}.{h:02}:{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    };
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

pub fn parse(text: &str) -> Result<Duration> {
    let bad = || HeraldError::Serialization(format!("invalid timespan: {text:?}"));

    let mut fields = text.trim().split(':');
    let (Some(head), Some(min), Some(sec), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(bad());
    };

    let (days, hours) = match head.split_once('.') {
        Some((d, h)) => (digits(d).ok_or_else(bad)?, digits(h).ok_or_else(bad)?),
        None => (0, digits(head).ok_or_else(bad)?),
    };
    let minutes = digits(min).ok_or_else(bad)?;
    let (secs, nanos) = match sec.split_once('.') {
        Some((s, f)) => (digits(s).ok_or_else(bad)?, fraction_nanos(f).ok_or_else(bad)?),
        None => (digits(sec).ok_or_else(bad)?, 0),
    };

    if hours > 23 || minutes > 59 || secs > 59 {
        return Err(bad());
    }

    let total = days
        .checked_mul(SECS_PER_DAY)
        .and_then(|v| v.checked_add(hours * 3600 + minutes * 60 + secs))
        .ok_or_else(bad)?;
    Ok(Duration::new(total, nanos))
}

fn digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn fraction_nanos(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 7 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ticks: u32 = format!("{s:0<7}").parse().ok()?;
    Some(ticks * NANOS_PER_TICK)
}

/// `#[serde(with = "timespan::option")]` for `Option<Duration>` fields.
pub mod option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => ser.serialize_str(&super::format(*d)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => super::parse(s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}
