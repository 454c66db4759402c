//! Bounded random primitives used by the synthesizer and the metrics engine.
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use rand::{
    distr::Alphanumeric,
    prelude::*,
    rngs::StdRng,
};

const TEXT_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789 ";

/// How many days back [`RandomSource::recent_timestamp`] may reach.
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// Wraps an [`Rng`] with the bounded draws the engine needs.
///
/// All integer bounds are inclusive. Degenerate ranges (`min >= max`) return `min` instead of panicking.
#[derive(Debug, Clone)]
pub struct RandomSource<R = StdRng> {
    rng: R,
}

impl RandomSource<StdRng> {
    /// Deterministic source, used by tests and reproducible demos.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Source seeded from the thread-local generator.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_rng(&mut rand::rng()))
    }
}

impl<R: Rng> RandomSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn int(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.rng.random_range(min..=max)
    }

    pub fn int32(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        self.rng.random_range(min..=max)
    }

    /// Index into a collection of `len` elements; `0` for an empty one.
    pub fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        self.rng.random_range(0..len)
    }

    pub fn boolean(&mut self) -> bool {
        self.rng.random_bool(0.5)
    }

    /// `true` with probability `p`, clamped to `[0, 1]`.
    pub fn chance(&mut self, p: f64) -> bool {
        if p.is_nan() || p <= 0.0 {
            return false;
        }
        self.rng.random_bool(p.min(1.0))
    }

    /// Uniform float in `[low, high)`. Empty or unbounded ranges yield `low`.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if low.is_nan() || high.is_nan() || low >= high || !(high - low).is_finite() {
            return low;
        }
        self.rng.random_range(low..high)
    }

    /// Alphanumeric string of exactly `len` characters.
    pub fn string(&mut self, len: usize) -> String {
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// Lowercase alphanumeric string, used for generated names.
    pub fn slug(&mut self, len: usize) -> String {
        self.string(len).to_lowercase()
    }

    /// Free text of at most `len` characters, words separated by spaces and trimmed.
    pub fn text(&mut self, len: usize) -> String {
        let s: String = (0..len)
            .map(|_| char::from(TEXT_CHARS[self.rng.random_range(0..TEXT_CHARS.len())]))
            .collect();
        s.trim().to_owned()
    }

    /// Timestamp in `[start, end]`.
    pub fn timestamp(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
        let span = (end - start).num_milliseconds();
        start + TimeDelta::milliseconds(self.int(0, span.max(0)))
    }

    /// Timestamp within [`RECENT_WINDOW_DAYS`] before `now`.
    pub fn recent_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp(now - TimeDelta::days(RECENT_WINDOW_DAYS), now)
    }

    pub fn ip(&mut self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.rng.random_range(1..=255),
            self.rng.random(),
            self.rng.random(),
            self.rng.random(),
        )
    }

    /// Non-privileged port in `[1024, 65535]`.
    pub fn port(&mut self) -> u16 {
        self.rng.random_range(1024..=65535)
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// `count` distinct elements of `items` in random order (all of them if `count` exceeds the length).
    pub fn sample<T: Clone>(&mut self, items: &[T], count: usize) -> Vec<T> {
        let mut items = items.to_vec();
        items.shuffle(&mut self.rng);
        items.truncate(count);
        items
    }
}
