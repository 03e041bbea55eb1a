//! Minute-aligned sample windows

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::clock::{MinuteKey, SampleClock};
use crate::resample::Resampler;

/// Zero-filled run of lost samples
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapEvent {
    /// Extended sample timestamp of the first missing sample
    pub start_timestamp: u64,

    /// Number of placeholder samples inserted
    pub samples: u64,
}

impl GapEvent {
    /// Extended timestamp one past the last missing sample
    pub fn end_timestamp(&self) -> u64 {
        self.start_timestamp + self.samples
    }
}

/// One UTC minute of samples
///
/// Holds exactly one minute of native-rate samples, starting
/// at the first sample of the minute, and the decimated samples
/// for the same interval. Lost samples are present as zeros and
/// are listed in [`gaps()`](#method.gaps).
#[derive(Clone, Debug, PartialEq)]
pub struct MinuteWindow {
    key: MinuteKey,
    start_timestamp: u64,
    sample_rate: u32,
    samples: Vec<Complex<f32>>,
    decimation: u64,
    decimated: Vec<Complex<f32>>,
    gaps: Vec<GapEvent>,
    filled: u64,
    wall_clock: DateTime<Utc>,
}

impl MinuteWindow {
    /// Window from samples obtained elsewhere
    ///
    /// The window has no decimated samples and no gaps; its
    /// wall-clock time is the start of `key`.
    pub fn new(key: MinuteKey, sample_rate: u32, samples: Vec<Complex<f32>>) -> Self {
        Self {
            key,
            start_timestamp: 0,
            sample_rate,
            samples,
            decimation: 1,
            decimated: Vec::new(),
            gaps: Vec::new(),
            filled: 0,
            wall_clock: key.start_utc(),
        }
    }

    /// Attach decimated samples at `sample_rate / decimation`
    pub fn with_decimated(mut self, decimated: Vec<Complex<f32>>, decimation: u64) -> Self {
        self.decimated = decimated;
        self.decimation = decimation.max(1);
        self
    }

    /// Mark runs of samples as zero-filled placeholders
    pub fn with_gaps(mut self, gaps: Vec<GapEvent>) -> Self {
        self.filled = gaps.iter().map(|g| g.samples).sum();
        self.gaps = gaps;
        self
    }

    /// Minute identifier
    pub fn key(&self) -> MinuteKey {
        self.key
    }

    /// Extended sample timestamp of the first sample
    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    /// RTP timestamp of the first sample
    pub fn rtp_timestamp(&self) -> u32 {
        self.start_timestamp as u32
    }

    /// Native sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Native-rate samples
    pub fn samples(&self) -> &[Complex<f32>] {
        &self.samples
    }

    /// Decimated samples
    pub fn decimated(&self) -> &[Complex<f32>] {
        &self.decimated
    }

    /// Decimated sample rate (Hz)
    pub fn decimated_rate(&self) -> f64 {
        self.sample_rate as f64 / self.decimation as f64
    }

    /// Zero-filled runs, in time order
    pub fn gaps(&self) -> &[GapEvent] {
        &self.gaps
    }

    /// Fraction of samples which were actually received
    pub fn completeness(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            1.0 - self.filled as f64 / self.samples.len() as f64
        }
    }

    /// UTC time of the first sample, per the sample clock
    pub fn wall_clock(&self) -> DateTime<Utc> {
        self.wall_clock
    }

    /// Index of the native sample at `ms` milliseconds into the minute
    pub fn index_at_ms(&self, ms: f64) -> usize {
        (ms * self.sample_rate as f64 / 1000.0).round().max(0.0) as usize
    }
}

/// Cuts a contiguous sample stream into [`MinuteWindow`]s
///
/// The assembler is created at the first sample of a
/// contiguous run. Windows begin at the first minute boundary
/// at or after that sample; earlier samples only prime the
/// resampler. The resampler's phase is chosen so that one of
/// its outputs lands on every minute boundary.
///
/// A window is released once its native samples *and* its
/// decimated samples are complete. The decimated part trails
/// by the resampler's lookahead.
#[derive(Clone, Debug)]
pub struct MinuteAssembler {
    clock: SampleClock,
    resampler: Resampler,
    ratio: u64,
    samples_per_minute: u64,
    origin: u64,
    first_boundary: u64,
    next_ts: u64,
    current: Option<PartialMinute>,
    pending: VecDeque<PartialMinute>,
    decimated: VecDeque<Complex<f32>>,
    decimated_start: u64,
}

impl MinuteAssembler {
    /// Start assembly with the sample at extended timestamp `start`
    ///
    /// The caller guarantees that the clock's samples per minute
    /// is a multiple of the resampler's ratio.
    pub fn new(clock: SampleClock, resampler: Resampler, start: u64) -> Self {
        let ratio = resampler.ratio().max(1);
        let key = clock.minute_key(start);
        let mut boundary = clock.minute_start(key);
        if boundary < start as i128 {
            boundary = clock.minute_start(key.next());
        }
        // within one minute after `start`
        let first_boundary = u64::try_from(boundary).unwrap_or(start);
        let origin = first_boundary - ((first_boundary - start) / ratio) * ratio;
        Self {
            clock,
            resampler,
            ratio,
            samples_per_minute: clock.samples_per_minute(),
            origin,
            first_boundary,
            next_ts: start,
            current: None,
            pending: VecDeque::new(),
            decimated: VecDeque::new(),
            decimated_start: origin,
        }
    }

    /// Extended timestamp expected for the next sample
    pub fn next_timestamp(&self) -> u64 {
        self.next_ts
    }

    /// Extended timestamp of the first window
    pub fn first_boundary(&self) -> u64 {
        self.first_boundary
    }

    /// Sample clock
    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    /// Append contiguous samples
    ///
    /// If `fill` is true, the samples are placeholders for lost
    /// data and are recorded as a gap. Returns any windows which
    /// this input completes.
    pub fn push(&mut self, samples: &[Complex<f32>], fill: bool) -> Vec<MinuteWindow> {
        let start = self.next_ts;
        let len = samples.len() as u64;
        self.next_ts += len;

        let skip = self.origin.saturating_sub(start).min(len) as usize;
        let decimated = self.resampler.process(&samples[skip..]);
        self.decimated.extend(decimated);

        let mut idx = self.first_boundary.saturating_sub(start).min(len) as usize;
        while idx < samples.len() {
            let ts = start + idx as u64;
            let spm = self.samples_per_minute as usize;
            let clock = &self.clock;
            let cur = self
                .current
                .get_or_insert_with(|| PartialMinute::new(clock.minute_key(ts), ts, spm));
            let take = (spm - cur.samples.len()).min(samples.len() - idx);
            cur.samples.extend_from_slice(&samples[idx..idx + take]);
            if fill {
                cur.record_gap(ts, take as u64);
            }
            idx += take;

            if cur.samples.len() == spm {
                if let Some(done) = self.current.take() {
                    self.pending.push_back(done);
                }
            }
        }

        self.release()
    }

    /// Close the stream
    ///
    /// The open minute, if any, is completed with placeholder
    /// samples. The resampler lookahead is drained and every
    /// remaining window is released.
    pub fn finish(&mut self) -> Vec<MinuteWindow> {
        let mut out = Vec::new();
        if let Some(cur) = &self.current {
            let missing = self.samples_per_minute as usize - cur.samples.len();
            out.extend(self.push(&vec![Complex::new(0.0, 0.0); missing], true));
        }
        let tail = self.resampler.flush();
        self.decimated.extend(tail);
        out.extend(self.release());
        out
    }

    fn release(&mut self) -> Vec<MinuteWindow> {
        let mut out = Vec::new();
        let per_window = (self.samples_per_minute / self.ratio) as usize;
        while let Some(front) = self.pending.front() {
            let skip = ((front.start_ts - self.decimated_start) / self.ratio) as usize;
            if self.decimated.len() < skip + per_window {
                break;
            }
            let Some(done) = self.pending.pop_front() else {
                break;
            };
            self.decimated.drain(..skip);
            let decimated: Vec<Complex<f32>> = self.decimated.drain(..per_window).collect();
            self.decimated_start = done.start_ts + self.samples_per_minute;
            out.push(done.into_window(&self.clock, self.ratio, decimated));
        }
        out
    }
}

#[derive(Clone, Debug)]
struct PartialMinute {
    key: MinuteKey,
    start_ts: u64,
    samples: Vec<Complex<f32>>,
    gaps: Vec<GapEvent>,
}

impl PartialMinute {
    fn new(key: MinuteKey, start_ts: u64, capacity: usize) -> Self {
        Self {
            key,
            start_ts,
            samples: Vec::with_capacity(capacity),
            gaps: Vec::new(),
        }
    }

    fn record_gap(&mut self, start_timestamp: u64, samples: u64) {
        if let Some(last) = self.gaps.last_mut() {
            if last.end_timestamp() == start_timestamp {
                last.samples += samples;
                return;
            }
        }
        self.gaps.push(GapEvent {
            start_timestamp,
            samples,
        });
    }

    fn into_window(
        self,
        clock: &SampleClock,
        decimation: u64,
        decimated: Vec<Complex<f32>>,
    ) -> MinuteWindow {
        MinuteWindow {
            key: self.key,
            start_timestamp: self.start_ts,
            sample_rate: clock.sample_rate(),
            samples: self.samples,
            decimation,
            decimated,
            filled: self.gaps.iter().map(|g| g.samples).sum(),
            gaps: self.gaps,
            wall_clock: clock.utc(self.start_ts),
        }
    }
}
