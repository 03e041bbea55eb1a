//! Station discrimination
//!
//! Once per minute, the [`StationDiscriminator`] decides which
//! station(s) can be heard on a channel and how well. It works on
//! the amplitude envelope of the complex baseband signal, which
//! carries the stations' AM audio:
//!
//! 1. The envelope is AC-coupled to strip the carrier level.
//! 2. Each station's top-of-minute tone is sought with a
//!    quadrature matched filter ([`ToneDetector`]). Its leading
//!    edge gives the time of arrival.
//! 3. On shared channels, the per-station tick trains are
//!    correlated to confirm or contest the tone winner
//!    ([`TimecodeCorrelator`]).
//! 4. During the hourly minutes in which only one station sends
//!    a 440 Hz tone, that tone settles the question outright.
//!
//! The result is a [`ChannelCharacterization`] with a
//! [`ConfidenceTier`], or an explicit "no discrimination".

mod dcblock;
mod timecode;
mod tone;

pub use dcblock::DCBlocker;
pub use timecode::{
    tick_seconds, wwv_timecode, BcdSymbol, StationCorrelation, TimecodeCorrelator,
    TimecodeDiscrimination, TimecodeFailure, TimecodeParams, TimecodeResult,
};
pub use tone::{quadrature_template, to_db, LeadingEdge, ToneDetector, ToneMeasurement};

#[cfg(not(test))]
use log::{debug, info};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;

use std::f64::consts::PI;

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use strum::EnumMessage;

use crate::builder::DiscriminatorBuilder;
use crate::clock::MinuteKey;
use crate::ingest::MinuteWindow;
use crate::station::{ChannelInfo, Station};

/// Frequency of the hourly identification tone (Hz)
pub const GROUND_TRUTH_HZ: f32 = 440.0;

/// Guard frequencies for the identification tone (Hz)
pub const GROUND_TRUTH_GUARD_HZ: [f32; 2] = [380.0, 520.0];

/// Window in which the identification tone is measured (s)
const GROUND_TRUTH_SPAN_SECS: (f32, f32) = (2.0, 12.0);

/// Per-minute station discrimination
///
/// Implementations are free to keep state between minutes,
/// but every minute must stand on its own.
pub trait Discriminator {
    /// Discriminate one minute
    fn discriminate(&mut self, window: &MinuteWindow) -> Discrimination;
}

/// How much the discriminator trusts its station decision
///
/// Tiers are totally ordered from least to most trusted.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumMessage,
)]
pub enum ConfidenceTier {
    /// Nothing usable
    #[strum(message = "none")]
    None,

    /// Detected, but barely or ambiguously
    #[strum(message = "weak")]
    Weak,

    /// Clear detection with a modest margin
    #[strum(message = "medium")]
    Medium,

    /// Clear detection with a wide margin
    #[strum(message = "strong")]
    Strong,

    /// Settled by the station identification tone
    #[strum(message = "ground truth")]
    GroundTruth,
}

impl ConfidenceTier {
    /// One tier higher, but never to `GroundTruth`
    pub fn promoted(self) -> Self {
        match self {
            ConfidenceTier::None => ConfidenceTier::Weak,
            ConfidenceTier::Weak => ConfidenceTier::Medium,
            ConfidenceTier::Medium | ConfidenceTier::Strong => ConfidenceTier::Strong,
            ConfidenceTier::GroundTruth => ConfidenceTier::GroundTruth,
        }
    }

    /// One tier lower, but never below `None`
    pub fn demoted(self) -> Self {
        match self {
            ConfidenceTier::None | ConfidenceTier::Weak => ConfidenceTier::None,
            ConfidenceTier::Medium => ConfidenceTier::Weak,
            ConfidenceTier::Strong => ConfidenceTier::Medium,
            ConfidenceTier::GroundTruth => ConfidenceTier::GroundTruth,
        }
    }

    /// Human-readable name
    pub fn as_str(&self) -> &'static str {
        self.get_message().unwrap_or("")
    }
}

/// Matched-filter power at one candidate frequency
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TonePower {
    /// Station whose minute tone this is
    pub station: Station,

    /// Tone frequency (Hz)
    pub frequency_hz: f32,

    /// Tone amplitude (dB)
    pub power_db: f32,

    /// Signal to guard-band noise (dB)
    pub snr_db: f32,
}

/// A detected station
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationDetection {
    /// Station
    pub station: Station,

    /// Tone frequency (Hz)
    pub frequency_hz: f32,

    /// Tone amplitude, relative to full scale
    pub amplitude: f32,

    /// Tone amplitude (dB)
    pub power_db: f32,

    /// Signal to guard-band noise (dB)
    pub snr_db: f32,

    /// Arrival of the tone's leading edge, in native samples
    /// after the start of the minute
    pub toa_samples: f64,

    /// Arrival of the tone's leading edge (ms)
    pub toa_ms: f64,

    /// 10% to 90% rise time of the leading edge (ms)
    pub rise_ms: f64,
}

/// Per-minute channel snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelCharacterization {
    /// Minute
    pub minute: MinuteKey,

    /// Channel name
    pub channel: String,

    /// SNR of the deciding detection (dB)
    pub snr_db: f32,

    /// Multipath delay spread (ms)
    pub delay_spread_ms: f32,

    /// Doppler spread (Hz)
    pub doppler_spread_hz: f32,

    /// Station judged dominant
    pub dominant: Option<Station>,

    /// Confidence in `dominant`
    pub tier: ConfidenceTier,

    /// Station identified by its identification tone
    pub ground_truth: Option<Station>,
}

/// Why a minute could not be discriminated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoDiscriminationReason {
    /// Too many samples were lost
    Incomplete,

    /// No station rose above the detection threshold
    NoSignal,
}

/// Discriminator output for one minute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Discrimination {
    /// A station decision was reached
    Characterized {
        /// Channel snapshot
        characterization: ChannelCharacterization,

        /// Stations whose tone was detected
        detections: Vec<StationDetection>,

        /// Tone power at every candidate frequency
        tone_powers: Vec<TonePower>,

        /// Time-code correlation, if applicable
        timecode: TimecodeResult,
    },

    /// No decision is possible this minute
    NoDiscrimination {
        /// Minute
        minute: MinuteKey,

        /// Why
        reason: NoDiscriminationReason,

        /// Tone power at every candidate frequency, if measured
        tone_powers: Vec<TonePower>,
    },
}

impl Discrimination {
    /// Minute
    pub fn minute(&self) -> MinuteKey {
        match self {
            Discrimination::Characterized {
                characterization, ..
            } => characterization.minute,
            Discrimination::NoDiscrimination { minute, .. } => *minute,
        }
    }

    /// Channel snapshot, if a decision was reached
    pub fn characterization(&self) -> Option<&ChannelCharacterization> {
        match self {
            Discrimination::Characterized {
                characterization, ..
            } => Some(characterization),
            Discrimination::NoDiscrimination { .. } => None,
        }
    }

    /// Detected stations
    pub fn detections(&self) -> &[StationDetection] {
        match self {
            Discrimination::Characterized { detections, .. } => detections,
            Discrimination::NoDiscrimination { .. } => &[],
        }
    }

    /// Detection of `station`, if any
    pub fn detection(&self, station: Station) -> Option<&StationDetection> {
        self.detections().iter().find(|d| d.station == station)
    }

    /// Time-code correlation, if the minute was characterized
    pub fn timecode(&self) -> Option<&TimecodeResult> {
        match self {
            Discrimination::Characterized { timecode, .. } => Some(timecode),
            Discrimination::NoDiscrimination { .. } => None,
        }
    }

    /// Tone power at every candidate frequency
    pub fn tone_powers(&self) -> &[TonePower] {
        match self {
            Discrimination::Characterized { tone_powers, .. } => tone_powers,
            Discrimination::NoDiscrimination { tone_powers, .. } => tone_powers,
        }
    }
}

/// Matched-filter and time-code station discriminator
///
/// Create with a
/// [`DiscriminatorBuilder`](crate::DiscriminatorBuilder).
#[derive(Clone, Debug)]
pub struct StationDiscriminator {
    channel: ChannelInfo,
    sample_rate: u32,
    params: DiscriminatorBuilder,
    dc_block: DCBlocker,
    detectors: Vec<(Station, ToneDetector)>,
    ground_truth: Option<ToneDetector>,
    timecode: TimecodeCorrelator,
}

impl StationDiscriminator {
    /// Discriminator for `channel` at `sample_rate`
    pub fn new(params: &DiscriminatorBuilder, channel: ChannelInfo, sample_rate: u32) -> Self {
        let detectors = channel
            .stations()
            .iter()
            .map(|st| {
                let secs = st.minute_tone_secs().min(params.tone_template_secs());
                let det = ToneDetector::new(
                    st.minute_tone_hz(),
                    sample_rate,
                    secs_to_samples(secs, sample_rate),
                    params.taper_alpha(),
                )
                .with_guards(params.guard_hz());
                (*st, det)
            })
            .collect();

        let ground_truth = channel.is_shared().then(|| {
            let span = GROUND_TRUTH_SPAN_SECS.1 - GROUND_TRUTH_SPAN_SECS.0;
            ToneDetector::new(
                GROUND_TRUTH_HZ,
                sample_rate,
                secs_to_samples(span, sample_rate),
                params.taper_alpha(),
            )
            .with_guards(&GROUND_TRUTH_GUARD_HZ)
        });

        let dc_len = (sample_rate as f32 / params.dc_block_hz()).round() as usize;
        Self {
            timecode: TimecodeCorrelator::new(sample_rate, channel.stations(), params.timecode()),
            channel,
            sample_rate,
            params: params.clone(),
            dc_block: DCBlocker::new(dc_len),
            detectors,
            ground_truth,
        }
    }

    /// Channel
    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    /// Native sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Confidence tier for a single-station channel
    pub fn single_station_tier(&self, snr_db: f32) -> ConfidenceTier {
        if snr_db >= self.params.strong_snr_db() {
            ConfidenceTier::Strong
        } else if snr_db >= self.params.medium_snr_db() {
            ConfidenceTier::Medium
        } else if snr_db >= self.params.detection_snr_db() {
            ConfidenceTier::Weak
        } else {
            ConfidenceTier::None
        }
    }

    /// Confidence tier for a shared channel
    ///
    /// `margin_db` is the winner's tone power over the other
    /// station's. `timecode_agrees` is `None` when the time code
    /// gave no opinion.
    pub fn shared_tier(
        &self,
        snr_db: f32,
        margin_db: f32,
        timecode_agrees: Option<bool>,
    ) -> ConfidenceTier {
        let (strong_margin, medium_margin) = self.params.margin_db();
        let tier = if snr_db < self.params.detection_snr_db() {
            ConfidenceTier::None
        } else if margin_db >= strong_margin && snr_db >= self.params.strong_snr_db() {
            ConfidenceTier::Strong
        } else if margin_db >= medium_margin {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Weak
        };
        match timecode_agrees {
            Some(true) => tier.promoted(),
            Some(false) => tier.demoted(),
            None => tier,
        }
    }

    fn detect(&self, station: Station, tone: &ToneMeasurement, envelope: &[f32]) -> StationDetection {
        let edge = self.detector(station).and_then(|det| {
            det.leading_edge(
                envelope,
                tone,
                self.ms_to_samples(self.params.edge_ms()),
                self.ms_to_samples(self.params.edge_reach_ms()),
            )
        });
        let (toa_samples, rise) = match edge {
            Some(edge) => (edge.onset, edge.rise),
            None => (tone.offset as f64, 0.0),
        };
        StationDetection {
            station,
            frequency_hz: tone.frequency_hz,
            amplitude: tone.amplitude,
            power_db: tone.power_db,
            snr_db: tone.snr_db,
            toa_samples,
            toa_ms: self.samples_to_ms(toa_samples),
            rise_ms: self.samples_to_ms(rise),
        }
    }

    // Strongest first. Each detected burst is cancelled before
    // weaker stations' edges are sought, so that its onset
    // transient cannot pass for theirs.
    fn detect_all(
        &self,
        measured: &[(Station, ToneMeasurement)],
        envelope: &[f32],
    ) -> Vec<StationDetection> {
        let mut heard: Vec<(usize, Station, &ToneMeasurement)> = measured
            .iter()
            .enumerate()
            .filter(|(_, (_, m))| m.snr_db >= self.params.detection_snr_db())
            .map(|(i, (st, m))| (i, *st, m))
            .collect();
        heard.sort_by(|a, b| b.2.amplitude.total_cmp(&a.2.amplitude));

        let guard = self.ms_to_samples(self.params.edge_ms());
        let mut cleaned: Option<Vec<f32>> = None;
        let mut out = Vec::with_capacity(heard.len());
        for (k, (idx, station, tone)) in heard.iter().enumerate() {
            let signal = cleaned.as_deref().unwrap_or(envelope);
            let det = self.detect(*station, tone, signal);
            if k + 1 < heard.len() {
                if let Some(detector) = self.detector(*station) {
                    let buf = cleaned.get_or_insert_with(|| envelope.to_vec());
                    let len = secs_to_samples(station.minute_tone_secs(), self.sample_rate);
                    detector.cancel(buf, det.toa_samples, len, guard);
                }
            }
            out.push((*idx, det));
        }
        out.sort_by_key(|(idx, _)| *idx);
        out.into_iter().map(|(_, det)| det).collect()
    }

    fn identification(&self, envelope: &[f32], minute: MinuteKey) -> Option<(Station, f32)> {
        if minute.hour_of_day() == 0 {
            return None;
        }
        let station = match minute.minute_of_hour() {
            1 => Station::Wwvh,
            2 => Station::Wwv,
            _ => return None,
        };
        if !self.channel.carries(station) {
            return None;
        }
        let det = self.ground_truth.as_ref()?;
        let offset = secs_to_samples(GROUND_TRUTH_SPAN_SECS.0, self.sample_rate);
        let snr_db = to_db(det.correlate(envelope, offset)) - to_db(det.noise(envelope, offset));
        debug!(
            "{}: {} Hz identification tone at {:.1} dB SNR",
            self.channel.name(),
            GROUND_TRUTH_HZ,
            snr_db
        );
        (snr_db >= self.params.ground_truth_snr_db()).then_some((station, snr_db))
    }

    fn detector(&self, station: Station) -> Option<&ToneDetector> {
        self.detectors
            .iter()
            .find(|(st, _)| *st == station)
            .map(|(_, det)| det)
    }

    fn ms_to_samples(&self, ms: f32) -> usize {
        secs_to_samples(ms / 1000.0, self.sample_rate)
    }

    fn samples_to_ms(&self, samples: f64) -> f64 {
        samples * 1000.0 / self.sample_rate as f64
    }
}

impl Discriminator for StationDiscriminator {
    fn discriminate(&mut self, window: &MinuteWindow) -> Discrimination {
        let minute = window.key();
        if window.completeness() < self.params.min_completeness() {
            info!(
                "{}: minute {} only {:.0}% complete; not discriminated",
                self.channel.name(),
                minute,
                100.0 * window.completeness()
            );
            return Discrimination::NoDiscrimination {
                minute,
                reason: NoDiscriminationReason::Incomplete,
                tone_powers: Vec::new(),
            };
        }

        let envelope = envelope(window.samples());
        let envelope = self.dc_block.ac_couple(&envelope);

        let search = self.ms_to_samples(self.params.tone_search_ms());
        let step = self.ms_to_samples(1.0);
        let measured: Vec<(Station, ToneMeasurement)> = self
            .detectors
            .iter()
            .map(|(st, det)| (*st, det.measure(&envelope, search, step)))
            .collect();
        let tone_powers: Vec<TonePower> = measured
            .iter()
            .map(|(st, m)| TonePower {
                station: *st,
                frequency_hz: m.frequency_hz,
                power_db: m.power_db,
                snr_db: m.snr_db,
            })
            .collect();
        let detections = self.detect_all(&measured, &envelope);

        let identified = if self.channel.is_shared() {
            self.identification(&envelope, minute)
        } else {
            None
        };
        let timecode = self.timecode.discriminate(&envelope, minute);
        let tc_dominant = timecode
            .discrimination()
            .filter(|tc| !tc.low_quality)
            .map(|tc| tc.dominant);

        let winner = detections
            .iter()
            .max_by(|a, b| a.snr_db.total_cmp(&b.snr_db))
            .copied();

        let (dominant, tier, snr_db) = match (identified, winner) {
            (Some((station, gt_snr)), _) => (
                station,
                ConfidenceTier::GroundTruth,
                winner.map(|w| w.snr_db).unwrap_or(gt_snr),
            ),
            (None, Some(w)) if self.channel.is_shared() => {
                let other = tone_powers
                    .iter()
                    .filter(|tp| tp.station != w.station)
                    .map(|tp| tp.power_db)
                    .fold(f32::MIN, f32::max);
                let margin = w.power_db - other;
                let agrees = tc_dominant.map(|st| st == w.station);
                (w.station, self.shared_tier(w.snr_db, margin, agrees), w.snr_db)
            }
            (None, Some(w)) => (w.station, self.single_station_tier(w.snr_db), w.snr_db),
            (None, None) => match tc_dominant {
                Some(station) => (station, ConfidenceTier::Weak, 0.0),
                None => {
                    info!(
                        "{}: minute {}: no station detected",
                        self.channel.name(),
                        minute
                    );
                    return Discrimination::NoDiscrimination {
                        minute,
                        reason: NoDiscriminationReason::NoSignal,
                        tone_powers,
                    };
                }
            },
        };

        let ideal_rise = 0.8 * self.params.edge_ms() as f64;
        let delay_spread_ms = detections
            .iter()
            .find(|d| d.station == dominant)
            .map(|d| (d.rise_ms - ideal_rise).max(0.0))
            .unwrap_or(0.0) as f32;
        let doppler_spread_hz = doppler_spread(window.decimated(), window.decimated_rate());

        let characterization = ChannelCharacterization {
            minute,
            channel: self.channel.name().to_owned(),
            snr_db,
            delay_spread_ms,
            doppler_spread_hz,
            dominant: Some(dominant),
            tier,
            ground_truth: identified.map(|(st, _)| st),
        };
        info!(
            "{}: minute {}: {} ({}), SNR {:.1} dB, delay spread {:.2} ms, doppler spread {:.3} Hz",
            self.channel.name(),
            minute,
            dominant,
            tier.as_str(),
            snr_db,
            delay_spread_ms,
            doppler_spread_hz
        );

        Discrimination::Characterized {
            characterization,
            detections,
            tone_powers,
            timecode,
        }
    }
}

/// Amplitude envelope of complex samples
pub fn envelope(samples: &[Complex<f32>]) -> Vec<f32> {
    samples.iter().map(|s| s.norm()).collect()
}

/// Doppler spread of a decimated carrier (Hz)
///
/// The standard deviation of the instantaneous frequency between
/// consecutive samples. Pairs which include a zero-filled
/// placeholder are skipped.
pub fn doppler_spread(decimated: &[Complex<f32>], rate: f64) -> f32 {
    let scale = rate / (2.0 * PI);
    let freqs: Vec<f64> = decimated
        .windows(2)
        .filter(|pair| pair[0].norm_sqr() > 0.0 && pair[1].norm_sqr() > 0.0)
        .map(|pair| (pair[1] * pair[0].conj()).arg() as f64 * scale)
        .collect();
    if freqs.len() < 2 {
        return 0.0;
    }
    let n = freqs.len() as f64;
    let mean = freqs.iter().sum::<f64>() / n;
    let var = freqs.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n;
    var.sqrt() as f32
}

fn secs_to_samples(secs: f32, sample_rate: u32) -> usize {
    (secs as f64 * sample_rate as f64).round().max(0.0) as usize
}
