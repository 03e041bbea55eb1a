//! Per-minute archive records

use chrono::{DateTime, Utc};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::clock::MinuteKey;
use crate::discriminator::TonePower;
use crate::ingest::{GapEvent, MinuteWindow};
use crate::station::ChannelInfo;

/// One minute of decimated samples and their metadata
///
/// Handed to archival collaborators once per minute. How and
/// where it is stored is up to them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Minute
    pub minute: MinuteKey,

    /// Channel name
    pub channel: String,

    /// Carrier frequency (Hz)
    pub carrier_hz: f64,

    /// Native sample rate (Hz)
    pub sample_rate: u32,

    /// Decimated sample rate (Hz)
    pub decimated_rate: f64,

    /// Extended sample-clock timestamp of the first sample
    pub start_timestamp: u64,

    /// UTC time of the first sample, per the sample clock
    pub wall_clock: DateTime<Utc>,

    /// Fraction of samples actually received
    pub completeness: f64,

    /// Number of zero-filled runs
    pub gap_count: usize,

    /// Zero-filled runs
    pub gaps: Vec<GapEvent>,

    /// Tone power at each candidate frequency
    pub tone_powers: Vec<TonePower>,

    /// Decimated samples
    pub samples: Vec<Complex<f32>>,
}

impl ArchiveRecord {
    /// Record for `window`, received on `channel`
    pub fn new(channel: &ChannelInfo, window: &MinuteWindow, tone_powers: &[TonePower]) -> Self {
        Self {
            minute: window.key(),
            channel: channel.name().to_owned(),
            carrier_hz: channel.carrier_hz(),
            sample_rate: window.sample_rate(),
            decimated_rate: window.decimated_rate(),
            start_timestamp: window.start_timestamp(),
            wall_clock: window.wall_clock(),
            completeness: window.completeness(),
            gap_count: window.gaps().len(),
            gaps: window.gaps().to_vec(),
            tone_powers: tone_powers.to_vec(),
            samples: window.decimated().to_vec(),
        }
    }

    /// Duration covered by the samples (s)
    pub fn duration_secs(&self) -> f64 {
        if self.decimated_rate > 0.0 {
            self.samples.len() as f64 / self.decimated_rate
        } else {
            0.0
        }
    }
}
