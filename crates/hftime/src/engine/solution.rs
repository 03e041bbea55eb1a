//! Transmission-time solutions

use serde::{Deserialize, Serialize};

use super::modes::PropagationMode;
use super::selection::EvidenceKind;
use crate::clock::MinuteKey;
use crate::station::Station;

/// How far a solution got
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionStatus {
    /// Station selected and timed
    Solved,

    /// Station selected on a hunch, or its tone was not timed
    /// here
    LowConfidence,

    /// No usable evidence
    Unresolved,
}

/// One propagation hypothesis
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Mode
    pub mode: PropagationMode,

    /// Virtual reflection height (km)
    pub layer_height_km: f64,

    /// Path length (km)
    pub path_km: f64,

    /// Takeoff elevation (degrees)
    pub elevation_deg: f64,

    /// Predicted propagation delay (ms)
    pub propagation_delay_ms: f64,

    /// Implied emission time after the minute boundary (ms)
    pub emission_offset_ms: f64,

    /// Emission offset less the station's published offset (ms)
    pub residual_ms: f64,

    /// `|residual| / σ + hop penalty × hops`; lower is better
    pub score: f64,
}

/// Transmission time for one channel and minute
///
/// Timing fields are `None` unless the selected station's tone
/// was timed on this channel. A `LowConfidence` solution may
/// still be timed when only a tentative prediction chose the
/// station.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransmissionSolution {
    /// Minute
    pub minute: MinuteKey,

    /// Channel name
    pub channel: String,

    /// Selected station
    pub station: Option<Station>,

    /// Evidence which selected the station
    pub evidence: EvidenceKind,

    /// Status
    pub status: SolutionStatus,

    /// Offset of the received minute mark from UTC, after
    /// removing propagation (ms)
    pub nist_offset_ms: Option<f64>,

    /// Implied emission time after the minute boundary (ms)
    pub emission_offset_ms: Option<f64>,

    /// Propagation delay (ms)
    pub propagation_delay_ms: Option<f64>,

    /// Propagation mode
    pub mode: Option<PropagationMode>,

    /// Number of hops
    pub hop_count: Option<u8>,

    /// Virtual reflection height (km)
    pub layer_height_km: Option<f64>,

    /// One-sigma timing uncertainty (ms)
    pub uncertainty_ms: Option<f64>,

    /// Confidence, from 0 to 1
    pub confidence: f32,

    /// Station identity confirmed
    pub verified: bool,

    /// Every feasible hypothesis, best first
    pub candidates: Vec<Candidate>,
}

impl TransmissionSolution {
    /// A solution with no station and no timing
    pub fn unresolved<S>(minute: MinuteKey, channel: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            minute,
            channel: channel.into(),
            station: None,
            evidence: EvidenceKind::None,
            status: SolutionStatus::Unresolved,
            nist_offset_ms: None,
            emission_offset_ms: None,
            propagation_delay_ms: None,
            mode: None,
            hop_count: None,
            layer_height_km: None,
            uncertainty_ms: None,
            confidence: 0.0,
            verified: false,
            candidates: Vec::new(),
        }
    }

    /// True if a station was timed
    pub fn is_solved(&self) -> bool {
        self.status == SolutionStatus::Solved
    }

    /// Mode label, like `2F2`
    pub fn mode_label(&self) -> Option<String> {
        self.mode.map(|m| m.label())
    }
}
