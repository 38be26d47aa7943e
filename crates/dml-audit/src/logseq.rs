// logseq.rs — Ordering token for events sharing a coarse timestamp.
//
// Audit timestamps have one-second resolution, so under load many events
// share a `ts`. Each event also gets a `logseq`, and consumers sort by
// (ts, logseq). The token is 53 bits wide so JSON readers that parse
// numbers as doubles keep it exact:
//
//   bits 52..43  millisecond within the second (0..=999)
//   bits 42..0   random
//
// Events in different milliseconds of the same second sort in time order.
// Events in the same millisecond sort in random order, and two events that
// draw the same 43 random bits in the same millisecond collide. For N
// events in one millisecond the collision probability is about
// N^2 / 2^44 (N = 10 000 gives ~5.7e-6). A collision means "concurrent,
// order unknown"; logseq is a tie-breaker, not a sequence counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of random low bits in a logseq.
pub const RANDOM_BITS: u32 = 43;

const RANDOM_MASK: i64 = (1 << RANDOM_BITS) - 1;

/// The same token computed inside a trigger. `'now'` is fixed for the
/// duration of one statement, so it matches the `ts` of the record.
/// `%f` renders as `SS.SSS`; characters 4..6 are the milliseconds.
pub const LOGSEQ_SQL: &str = "((CAST(substr(strftime('%f', 'now'), 4) AS INTEGER) << 43) \
     | (random() & 8796093022207))";

/// A per-event ordering token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Logseq(i64);

impl Logseq {
    /// Draw a fresh token for an event captured at `now`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self::from_parts(now.timestamp_subsec_millis(), rand::random::<u64>())
    }

    /// Build a token from its millisecond and random parts.
    ///
    /// `millis` is taken modulo 1000 (chrono reports leap seconds as
    /// 1000..=1999); only the low 43 bits of `random` are used.
    pub fn from_parts(millis: u32, random: u64) -> Self {
        let millis = i64::from(millis % 1000);
        let random = (random as i64) & RANDOM_MASK;
        Self((millis << RANDOM_BITS) | random)
    }

    /// Millisecond within the second this token was drawn in.
    pub fn millis(self) -> u32 {
        (self.0 >> RANDOM_BITS) as u32
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for Logseq {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Approximate probability that at least two of `n` tokens drawn in the
/// same millisecond collide (birthday bound).
pub fn collision_probability(n: u64) -> f64 {
    let pairs = n as f64 * n.saturating_sub(1) as f64 / 2.0;
    (pairs / (1u64 << RANDOM_BITS) as f64).min(1.0)
}
