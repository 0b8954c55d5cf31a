// Utility functions
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use std::time::Duration;

/// Parses a stored RFC 3339 timestamp into `DateTime<Utc>`, if possible.
pub fn parse_datetime(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(date_str)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Human date used in alert titles and bodies.
pub fn pretty_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

/// Uniformly draws from `base * (1 - factor) ..= base * (1 + factor)`.
pub fn jittered(base: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if base.is_zero() || factor == 0.0 {
        return base;
    }
    let secs = base.as_secs_f64();
    let low = secs * (1.0 - factor);
    let high = secs * (1.0 + factor);
    Duration::from_secs_f64(rand::rng().random_range(low..=high))
}

/// Adds `0 ..= max_extra` to `base`.
pub fn with_extra_jitter(base: Duration, max_extra: Duration) -> Duration {
    if max_extra.is_zero() {
        return base;
    }
    let extra = rand::rng().random_range(0.0..=max_extra.as_secs_f64());
    base + Duration::from_secs_f64(extra)
}

/// Escalating wait between failed whole runs. Each consecutive failure adds
/// `increment` (plus a little jitter); the first success resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    increment: Duration,
    jitter: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(increment: Duration, jitter: Duration) -> Self {
        Self {
            increment,
            jitter,
            current: Duration::ZERO,
            failures: 0,
        }
    }

    pub fn on_failure(&mut self) -> Duration {
        self.failures += 1;
        self.current += with_extra_jitter(self.increment, self.jitter);
        self.current
    }

    /// Returns true if this success ended a run of failures.
    pub fn on_success(&mut self) -> bool {
        let recovered = self.failures > 0;
        self.failures = 0;
        self.current = Duration::ZERO;
        recovered
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
