//! Time-code correlation
//!
//! WWV and WWVH both send the same 100 Hz BCD time code, but each
//! marks the seconds with its own tick: five milliseconds of
//! 1000 Hz from WWV and of 1200 Hz from WWVH. Correlating the
//! envelope against each station's tick train finds that
//! station's delay. The BCD pulse train, which both stations
//! share, is scored at the winning delay as a check that the
//! minute's code was actually received.
//!
//! ```txt
//! second:  0    1    2   ...  9   ...  29  ...  58   59
//! tick:    -    T    T        T        -        T    -
//! BCD:     -    0    0        P        P        n    P
//! ```
//!
//! Correlation quality `ρ` is normalized so that a clean tone
//! matching the reference scores 1.0, independent of amplitude
//! and phase.

use std::f64::consts::{PI, SQRT_2};

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::clock::MinuteKey;
use crate::station::Station;

/// BCD subcarrier frequency (Hz)
pub const BCD_SUBCARRIER_HZ: f32 = 100.0;

/// Delay from the start of each second to its BCD pulse (s)
pub const BCD_PULSE_DELAY_SECS: f32 = 0.030;

/// One second of the BCD time code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BcdSymbol {
    /// No pulse
    Blank,

    /// Binary zero: 200 ms pulse
    Zero,

    /// Binary one: 500 ms pulse
    One,

    /// Position marker: 800 ms pulse
    Marker,
}

impl BcdSymbol {
    /// Pulse duration (s)
    pub fn duration_secs(&self) -> f32 {
        match self {
            BcdSymbol::Blank => 0.0,
            BcdSymbol::Zero => 0.2,
            BcdSymbol::One => 0.5,
            BcdSymbol::Marker => 0.8,
        }
    }
}

/// BCD time code sent during `minute`
///
/// Encodes the UTC time at the start of the minute. Fields we
/// cannot know, such as DUT1 and the daylight-time flags, are
/// sent as zeros.
pub fn wwv_timecode(minute: MinuteKey) -> [BcdSymbol; 60] {
    let mut code = [BcdSymbol::Zero; 60];
    code[0] = BcdSymbol::Blank;
    for sec in [9, 19, 29, 39, 49, 59] {
        code[sec] = BcdSymbol::Marker;
    }

    let year = minute.year_of_century();
    let min = minute.minute_of_hour();
    let hour = minute.hour_of_day();
    let day = minute.day_of_year();

    put_bcd(&mut code, 4, 4, year % 10);
    put_bcd(&mut code, 10, 4, min % 10);
    put_bcd(&mut code, 15, 3, min / 10);
    put_bcd(&mut code, 20, 4, hour % 10);
    put_bcd(&mut code, 25, 2, hour / 10);
    put_bcd(&mut code, 30, 4, day % 10);
    put_bcd(&mut code, 35, 4, (day / 10) % 10);
    put_bcd(&mut code, 40, 2, day / 100);
    put_bcd(&mut code, 51, 4, year / 10);
    code
}

// LSB first
fn put_bcd(code: &mut [BcdSymbol; 60], start: usize, width: usize, value: u32) {
    for bit in 0..width {
        code[start + bit] = if value & (1 << bit) != 0 {
            BcdSymbol::One
        } else {
            BcdSymbol::Zero
        };
    }
}

/// Seconds of the minute which carry a tick
pub fn tick_seconds() -> impl Iterator<Item = usize> {
    (1..=58).filter(|s| *s != 29)
}

/// Correlation tuning
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimecodeParams {
    /// Plausible delays, `(min, max)` in ms
    pub window_ms: (f32, f32),

    /// Largest delay searched (ms)
    pub search_ms: f32,

    /// Noise floor is this many standard deviations above the mean
    pub noise_sigma: f32,

    /// Noise floor is never below this quality
    pub min_floor: f32,

    /// Quality below this is flagged as low
    pub low_quality: f32,

    /// BCD agreement below this is flagged as low quality
    pub min_code_match: f32,
}

impl Default for TimecodeParams {
    fn default() -> Self {
        Self {
            window_ms: (5.0, 30.0),
            search_ms: 100.0,
            noise_sigma: 4.0,
            min_floor: 0.2,
            low_quality: 0.5,
            min_code_match: 0.25,
        }
    }
}

/// One station's correlation peak
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationCorrelation {
    /// Station
    pub station: Station,

    /// Delay of the peak after the second (ms)
    pub lag_ms: f64,

    /// Tick amplitude at the peak
    pub amplitude: f32,

    /// Normalized correlation quality `ρ` at the peak
    pub quality: f32,

    /// Noise floor the peak had to exceed
    pub noise_floor: f32,
}

/// Successful time-code discrimination
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimecodeDiscrimination {
    /// Accepted stations, in channel order
    pub stations: Vec<StationCorrelation>,

    /// Station with the strongest ticks
    pub dominant: Station,

    /// Delay of the second station minus that of the first (ms)
    ///
    /// Present only when both stations on a shared channel
    /// were accepted.
    pub differential_delay_ms: Option<f64>,

    /// BCD correlation quality at the dominant station's delay
    pub code_match: f32,

    /// Best quality was below the low-quality threshold, or
    /// the minute's BCD code was not found at the dominant
    /// station's delay
    pub low_quality: bool,
}

/// Why time-code discrimination failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimecodeFailure {
    /// No station on the channel sends the BCD code
    NotApplicable,

    /// No peak rose above its noise floor
    BelowNoiseFloor,

    /// Peaks rose above the floor, but not at a plausible delay
    OutsideWindow,
}

/// Time-code result for one minute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TimecodeResult {
    /// At least one station was located
    Discriminated(TimecodeDiscrimination),

    /// Nothing trustworthy was found
    NoDiscrimination(TimecodeFailure),
}

impl TimecodeResult {
    /// Successful discrimination, if any
    pub fn discrimination(&self) -> Option<&TimecodeDiscrimination> {
        match self {
            TimecodeResult::Discriminated(d) => Some(d),
            TimecodeResult::NoDiscrimination(_) => None,
        }
    }
}

/// Correlates an envelope against per-station references
#[derive(Clone, Debug)]
pub struct TimecodeCorrelator {
    sample_rate: u32,
    params: TimecodeParams,
    ticks: Vec<(Station, Reference)>,
}

impl TimecodeCorrelator {
    /// Correlator for the BCD-capable stations among `stations`
    pub fn new(sample_rate: u32, stations: &[Station], params: TimecodeParams) -> Self {
        let tick_len = secs_to_samples(0.005, sample_rate).max(1);
        let ticks = stations
            .iter()
            .filter(|st| st.has_bcd_timecode())
            .map(|st| {
                let segments = tick_seconds()
                    .map(|s| (s * sample_rate as usize, tick_len))
                    .collect();
                (*st, Reference::new(st.tick_hz(), sample_rate, segments))
            })
            .collect();
        Self {
            sample_rate,
            params,
            ticks,
        }
    }

    /// Stations with a reference
    pub fn stations(&self) -> impl Iterator<Item = Station> + '_ {
        self.ticks.iter().map(|(st, _)| *st)
    }

    /// Discriminate one minute of AC-coupled envelope
    ///
    /// `envelope[0]` is the first sample of `minute`.
    pub fn discriminate(&self, envelope: &[f32], minute: MinuteKey) -> TimecodeResult {
        if self.ticks.is_empty() {
            return TimecodeResult::NoDiscrimination(TimecodeFailure::NotApplicable);
        }

        let max_lag = self.ms_to_samples(self.params.search_ms);
        let step = (self.sample_rate as usize / 4000).max(1);
        let win_lo = self.ms_to_samples(self.params.window_ms.0);
        let win_hi = self.ms_to_samples(self.params.window_ms.1);

        let mut accepted = Vec::new();
        let mut any_above_floor = false;
        for (station, reference) in &self.ticks {
            let scan: Vec<(usize, Correlation)> = (0..=max_lag)
                .step_by(step)
                .map(|lag| (lag, reference.correlate(envelope, lag)))
                .collect();
            let Some(coarse) = scan
                .iter()
                .max_by(|a, b| a.1.quality.total_cmp(&b.1.quality))
                .map(|(lag, _)| *lag)
            else {
                continue;
            };

            let (lag, peak) = (coarse.saturating_sub(step)..=(coarse + step).min(max_lag))
                .map(|lag| (lag, reference.correlate(envelope, lag)))
                .max_by(|a, b| a.1.quality.total_cmp(&b.1.quality))
                .unwrap_or((coarse, Correlation::default()));

            let exclusion = reference.max_segment_len();
            let floor = noise_floor(
                scan.iter()
                    .filter(|(l, _)| *l < win_lo || *l > win_hi)
                    .filter(|(l, _)| l.abs_diff(lag) > exclusion)
                    .map(|(_, c)| c.quality),
                self.params.noise_sigma,
            )
            .max(self.params.min_floor);

            if peak.quality <= floor {
                continue;
            }
            any_above_floor = true;
            if lag < win_lo || lag > win_hi {
                continue;
            }
            accepted.push(StationCorrelation {
                station: *station,
                lag_ms: lag as f64 * 1000.0 / self.sample_rate as f64,
                amplitude: peak.amplitude,
                quality: peak.quality,
                noise_floor: floor,
            });
        }

        let Some(dominant) = accepted
            .iter()
            .max_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
            .copied()
        else {
            return TimecodeResult::NoDiscrimination(if any_above_floor {
                TimecodeFailure::OutsideWindow
            } else {
                TimecodeFailure::BelowNoiseFloor
            });
        };

        let differential_delay_ms = match accepted.as_slice() {
            [first, second] => Some(second.lag_ms - first.lag_ms),
            _ => None,
        };
        let best_quality = accepted
            .iter()
            .map(|c| c.quality)
            .fold(0.0f32, f32::max);

        let bcd = self.bcd_reference(minute);
        let code_match = bcd
            .correlate(envelope, self.ms_to_samples(dominant.lag_ms as f32))
            .quality;

        TimecodeResult::Discriminated(TimecodeDiscrimination {
            dominant: dominant.station,
            stations: accepted,
            differential_delay_ms,
            code_match,
            low_quality: best_quality < self.params.low_quality
                || code_match < self.params.min_code_match,
        })
    }

    fn bcd_reference(&self, minute: MinuteKey) -> Reference {
        let delay = BCD_PULSE_DELAY_SECS;
        let segments = wwv_timecode(minute)
            .iter()
            .enumerate()
            .filter(|(_, sym)| **sym != BcdSymbol::Blank)
            .map(|(sec, sym)| {
                (
                    secs_to_samples(sec as f32 + delay, self.sample_rate),
                    secs_to_samples(sym.duration_secs(), self.sample_rate),
                )
            })
            .collect();
        Reference::new(BCD_SUBCARRIER_HZ, self.sample_rate, segments)
    }

    fn ms_to_samples(&self, ms: f32) -> usize {
        secs_to_samples(ms / 1000.0, self.sample_rate)
    }
}

fn secs_to_samples(secs: f32, sample_rate: u32) -> usize {
    (secs as f64 * sample_rate as f64).round().max(0.0) as usize
}

// mean + sigma × standard deviation
fn noise_floor<I>(values: I, sigma: f32) -> f32
where
    I: Iterator<Item = f32>,
{
    let (mut n, mut sum, mut sumsq) = (0usize, 0.0f64, 0.0f64);
    for v in values {
        n += 1;
        sum += v as f64;
        sumsq += (v as f64).powi(2);
    }
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    let var = (sumsq / n as f64 - mean * mean).max(0.0);
    (mean + sigma as f64 * var.sqrt()) as f32
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Correlation {
    quality: f32,
    amplitude: f32,
}

// Quadrature tone reference made of rectangular bursts
#[derive(Clone, Debug)]
struct Reference {
    omega: f64,
    segments: Vec<(usize, usize)>,
    phasor: Vec<Complex<f64>>,
}

impl Reference {
    fn new(frequency_hz: f32, sample_rate: u32, segments: Vec<(usize, usize)>) -> Self {
        let omega = 2.0 * PI * frequency_hz as f64 / sample_rate as f64;
        let longest = segments.iter().map(|(_, len)| *len).max().unwrap_or(0);
        let phasor = (0..longest)
            .map(|k| Complex::from_polar(1.0, -omega * k as f64))
            .collect();
        Self {
            omega,
            segments,
            phasor,
        }
    }

    fn max_segment_len(&self) -> usize {
        self.phasor.len()
    }

    fn correlate(&self, envelope: &[f32], lag: usize) -> Correlation {
        let mut total = Complex::new(0.0f64, 0.0f64);
        let mut energy = 0.0f64;
        let mut count = 0usize;
        for &(start, len) in &self.segments {
            let begin = (lag + start).min(envelope.len());
            let end = (lag + start + len).min(envelope.len());
            let mut acc = Complex::new(0.0f64, 0.0f64);
            for (x, p) in envelope[begin..end].iter().zip(self.phasor.iter()) {
                let x = *x as f64;
                acc += p * x;
                energy += x * x;
            }
            total += acc * Complex::from_polar(1.0, -self.omega * start as f64);
            count += len;
        }
        if count == 0 || energy <= 0.0 {
            return Correlation::default();
        }
        let mag = total.norm();
        Correlation {
            quality: (SQRT_2 * mag / (energy.sqrt() * (count as f64).sqrt())) as f32,
            amplitude: (2.0 * mag / count as f64) as f32,
        }
    }
}
