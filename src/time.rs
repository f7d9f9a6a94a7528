//! Generalized time handling and the engine clock.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Parses a generalized time value (`YYYYMMDDHHMMSSZ`, optionally with a
/// fraction before the `Z`).
///
/// Returns `None` for anything malformed; callers decide whether that
/// fails open or closed.
pub fn parse_generalized(value: &str) -> Option<DateTime<Utc>> {
    let body = value.trim().strip_suffix('Z')?;
    let (whole, frac) = match body.split_once(['.', ',']) {
        Some((w, f)) => (w, Some(f)),
        None => (body, None),
    };
    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;
    let mut micros = 0u32;
    if let Some(frac) = frac {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
        micros = digits.parse().ok()?;
    }
    let base = Utc.from_utc_datetime(&naive);
    Some(base + chrono::Duration::microseconds(i64::from(micros)))
}

/// Seconds since the epoch of a generalized time value.
pub fn parse_seconds(value: &str) -> Option<i64> {
    parse_generalized(value).map(|t| t.timestamp())
}

/// Formats whole seconds: `20240101120000Z`.
pub fn format_seconds(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(t) => t.format("%Y%m%d%H%M%SZ").to_string(),
        None => "19700101000000Z".to_string(),
    }
}

/// Formats with microsecond precision: `20240101120000.000123Z`.
pub fn format_micros(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d%H%M%S%.6fZ").to_string()
}

/// Source of "now" for policy decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn at_seconds(secs: i64) -> Self {
        Self {
            micros: AtomicI64::new(secs.saturating_mul(1_000_000)),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.micros
            .fetch_add(secs.saturating_mul(1_000_000), Ordering::SeqCst);
    }

    pub fn set_seconds(&self, secs: i64) {
        self.micros
            .store(secs.saturating_mul(1_000_000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        Utc.timestamp_micros(micros).single().unwrap_or_default()
    }
}
