//! Sample clock and minute keys
//!
//! Every per-minute entity is keyed by a [`MinuteKey`] which is
//! derived from the *sample clock*: the RTP timestamp carried by
//! each packet. The wall clock is consulted at most once, to
//! anchor the sample clock to UTC. After that, minute keys are
//! a pure function of the sample timestamp, so two processes on
//! different machines agree on minute boundaries even if their
//! system clocks disagree.

use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i128 = 1_000_000_000;
const NANOS_PER_MINUTE: i128 = 60 * NANOS_PER_SEC;

/// Minute identifier
///
/// Whole UTC minutes since the Unix epoch, as measured by
/// the sample clock.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MinuteKey(pub i64);

impl MinuteKey {
    /// Minute containing the UTC instant `t`
    pub fn from_utc(t: &DateTime<Utc>) -> Self {
        MinuteKey(t.timestamp().div_euclid(60))
    }

    /// UTC instant at the start of this minute
    pub fn start_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0 * 60, 0)
            .single()
            .unwrap_or_default()
    }

    /// Next minute
    pub fn next(&self) -> Self {
        MinuteKey(self.0 + 1)
    }

    /// Minute of the hour, `0..=59`
    pub fn minute_of_hour(&self) -> u32 {
        self.start_utc().minute()
    }

    /// Hour of the UTC day, `0..=23`
    pub fn hour_of_day(&self) -> u32 {
        self.start_utc().hour()
    }

    /// Day of the year, `1..=366`
    pub fn day_of_year(&self) -> u32 {
        self.start_utc().ordinal()
    }

    /// Two-digit year
    pub fn year_of_century(&self) -> u32 {
        (self.start_utc().year().rem_euclid(100)) as u32
    }
}

impl fmt::Display for MinuteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin of the extended timeline
///
/// The first timestamp of a stream is extended to
/// `TIMESTAMP_EPOCH + ts`. The low 32 bits of every extended
/// timestamp are the packet's own RTP timestamp.
pub const TIMESTAMP_EPOCH: u64 = 1 << 32;

/// Unwraps 32-bit RTP timestamps into a 64-bit timeline
///
/// Consecutive timestamps are assumed to be within 2³¹
/// samples of each other.
#[derive(Clone, Debug, Default)]
pub struct TimestampUnwrapper {
    last: Option<(u32, u64)>,
}

impl TimestampUnwrapper {
    /// New unwrapper with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend `ts` to 64 bits relative to the previous timestamp
    ///
    /// The first timestamp seen is extended with
    /// [`TIMESTAMP_EPOCH`], so that backwards steps never
    /// underflow.
    /// The unwrapper is not updated; see
    /// [`unwrap`](#method.unwrap).
    pub fn extend(&self, ts: u32) -> u64 {
        match self.last {
            None => TIMESTAMP_EPOCH + ts as u64,
            Some((last_ts, last_ext)) => {
                let delta = ts.wrapping_sub(last_ts) as i32 as i64;
                (last_ext as i64 + delta) as u64
            }
        }
    }

    /// Extend `ts` and make it the new reference point
    pub fn unwrap(&mut self, ts: u32) -> u64 {
        let ext = self.extend(ts);
        self.last = Some((ts, ext));
        ext
    }

    /// Forget history
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Maps extended sample timestamps to UTC
///
/// The mapping is fixed by one anchor pair: an extended
/// sample timestamp and the UTC instant at which that sample
/// was taken. The nominal sample rate does the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleClock {
    sample_rate: u32,
    anchor_ts: u64,
    anchor_unix_ns: i128,
}

impl SampleClock {
    /// Anchor extended timestamp `ts` to UTC instant `at`
    pub fn new(sample_rate: u32, ts: u64, at: DateTime<Utc>) -> Self {
        let anchor_unix_ns =
            at.timestamp() as i128 * NANOS_PER_SEC + at.timestamp_subsec_nanos() as i128;
        Self {
            sample_rate,
            anchor_ts: ts,
            anchor_unix_ns,
        }
    }

    /// Sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// UTC instant of `ts`, in nanoseconds since the epoch
    pub fn unix_nanos(&self, ts: u64) -> i128 {
        let dt = ts as i128 - self.anchor_ts as i128;
        self.anchor_unix_ns + dt * NANOS_PER_SEC / self.sample_rate as i128
    }

    /// UTC instant of `ts`
    pub fn utc(&self, ts: u64) -> DateTime<Utc> {
        let ns = self.unix_nanos(ts);
        Utc.timestamp_opt(
            ns.div_euclid(NANOS_PER_SEC) as i64,
            ns.rem_euclid(NANOS_PER_SEC) as u32,
        )
        .single()
        .unwrap_or_default()
    }

    /// Minute containing sample `ts`
    pub fn minute_key(&self, ts: u64) -> MinuteKey {
        MinuteKey(self.unix_nanos(ts).div_euclid(NANOS_PER_MINUTE) as i64)
    }

    /// Extended timestamp of the first sample of `minute`
    ///
    /// This is the first sample taken at or after the start
    /// of the minute. Minutes which begin before the start of
    /// the extended timeline have a negative start.
    pub fn minute_start(&self, minute: MinuteKey) -> i128 {
        let ns = minute.0 as i128 * NANOS_PER_MINUTE - self.anchor_unix_ns;
        let rate = self.sample_rate as i128;
        let samples = (ns * rate + NANOS_PER_SEC - 1).div_euclid(NANOS_PER_SEC);
        self.anchor_ts as i128 + samples
    }

    /// Number of samples in one minute
    pub fn samples_per_minute(&self) -> u64 {
        self.sample_rate as u64 * 60
    }
}
