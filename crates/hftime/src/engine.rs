//! Temporal engine
//!
//! For one channel and minute, the engine decides which station
//! was heard and when it transmitted. Station identity comes
//! from ranked evidence: the local discriminator, the best
//! anchor published by other channels, and a historical
//! prediction. See [`EvidenceKind`] for the ranking.
//!
//! Once a station is chosen, every feasible propagation mode
//! between that station and the receiver is scored against the
//! measured tone arrival:
//!
//! ```txt
//! emission = arrival − delay(mode)
//! residual = emission − station's published emission offset
//! score    = |residual| / σ + hop_penalty × hops
//! ```
//!
//! where `σ` comes from the [`UncertaintyModel`]. The
//! best-scoring mode is the solution.

mod modes;
mod predictor;
mod selection;
mod solution;
mod uncertainty;

pub use modes::{
    hop_geometry, Layer, ModeSearch, PropagationMode, PropagationPath, E_LAYER_KM, F2_LAYER_KM,
    SPEED_OF_LIGHT_KM_PER_MS,
};
pub use predictor::{HistoricalPredictor, StationPredictor};
pub use selection::{Evidence, EvidenceKind, Prediction, SelectionPolicy};
pub use solution::{Candidate, SolutionStatus, TransmissionSolution};
pub use uncertainty::UncertaintyModel;

#[cfg(not(test))]
use log::{debug, info};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;

use crate::clock::MinuteKey;
use crate::discriminator::{ChannelCharacterization, StationDetection};
use crate::station::{ChannelInfo, SiteLocation, Station};
use crate::voter::StationAnchor;

/// Everything known about one channel-minute
#[derive(Clone, Copy, Debug)]
pub struct SolverInput<'a> {
    /// Minute
    pub minute: MinuteKey,

    /// Channel
    pub channel: &'a ChannelInfo,

    /// Local discriminator decision, if any
    pub characterization: Option<&'a ChannelCharacterization>,

    /// Local tone detections
    pub detections: &'a [StationDetection],

    /// Best anchor from another channel, if any
    pub anchor: Option<&'a StationAnchor>,

    /// Historical prediction, if any
    pub prediction: Option<Prediction>,
}

/// Solves one channel-minute
pub trait Solver {
    /// Decide the station and its transmission time
    fn solve(&mut self, input: &SolverInput<'_>) -> TransmissionSolution;
}

/// Evidence-ranking, mode-searching transmission-time solver
#[derive(Clone, Debug)]
pub struct TemporalEngine {
    receiver: SiteLocation,
    policy: SelectionPolicy,
    uncertainty: UncertaintyModel,
    modes: ModeSearch,
    hop_penalty: f64,
}

impl TemporalEngine {
    /// Engine for a receiver at `receiver`
    pub fn new(receiver: SiteLocation) -> Self {
        Self {
            receiver,
            policy: SelectionPolicy::default(),
            uncertainty: UncertaintyModel::default(),
            modes: ModeSearch::default(),
            hop_penalty: 0.5,
        }
    }

    /// Station selection thresholds
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Timing uncertainty model
    pub fn with_uncertainty(mut self, uncertainty: UncertaintyModel) -> Self {
        self.uncertainty = uncertainty;
        self
    }

    /// Modes to consider
    pub fn with_mode_search(mut self, modes: ModeSearch) -> Self {
        self.modes = modes;
        self
    }

    /// Score added per hop
    ///
    /// Favors simpler paths when the timing cannot tell them
    /// apart.
    pub fn with_hop_penalty(mut self, penalty: f64) -> Self {
        self.hop_penalty = penalty.max(0.0);
        self
    }

    /// Receiver location
    pub fn receiver(&self) -> &SiteLocation {
        &self.receiver
    }

    /// Selection thresholds
    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Score every feasible mode from `station`, best first
    ///
    /// `arrival_ms` is the tone's arrival after the minute
    /// boundary. `sigma_ms` is the timing uncertainty.
    pub fn candidates(&self, station: Station, arrival_ms: f64, sigma_ms: f64) -> Vec<Candidate> {
        let sigma = sigma_ms.max(f64::EPSILON);
        let ground_km = station.site().distance_km(&self.receiver);
        let mut out: Vec<Candidate> = self
            .modes
            .paths(ground_km)
            .into_iter()
            .map(|path| {
                let emission = arrival_ms - path.delay_ms;
                let residual = emission - station.nominal_emission_offset_ms();
                Candidate {
                    mode: path.mode,
                    layer_height_km: path.mode.layer.height_km(),
                    path_km: path.path_km,
                    elevation_deg: path.elevation_deg,
                    propagation_delay_ms: path.delay_ms,
                    emission_offset_ms: emission,
                    residual_ms: residual,
                    score: residual.abs() / sigma + self.hop_penalty * path.mode.hops as f64,
                }
            })
            .collect();
        out.sort_by(|a, b| a.score.total_cmp(&b.score));
        out
    }
}

impl Solver for TemporalEngine {
    fn solve(&mut self, input: &SolverInput<'_>) -> TransmissionSolution {
        let channel = input.channel;
        let mut evidence = Vec::with_capacity(3);
        evidence.extend(
            input
                .characterization
                .and_then(|ch| self.policy.classify_local(ch)),
        );
        evidence.extend(
            input
                .anchor
                .and_then(|a| self.policy.classify_anchor(a, channel)),
        );
        evidence.extend(
            input
                .prediction
                .and_then(|p| self.policy.classify_prediction(&p, channel)),
        );

        let mut out = TransmissionSolution::unresolved(input.minute, channel.name());
        let Some(winner) = self.policy.select(&evidence) else {
            info!("{}: minute {}: unresolved", channel.name(), input.minute);
            return out;
        };
        debug!(
            "{}: minute {}: {} selected by {} evidence, of {}",
            channel.name(),
            input.minute,
            winner.station,
            winner.kind.as_str(),
            evidence.len()
        );

        let corroborated = input
            .anchor
            .map(|a| a.station == winner.station && channel.carries(a.station))
            .unwrap_or(false);
        out.station = Some(winner.station);
        out.evidence = winner.kind;
        out.verified = winner.kind == EvidenceKind::GroundTruth
            || (winner.kind == EvidenceKind::StrongAcoustic && corroborated);

        let Some(detection) = input
            .detections
            .iter()
            .find(|d| d.station == winner.station)
        else {
            out.status = SolutionStatus::LowConfidence;
            out.confidence = winner.confidence.min(self.policy.low_confidence_cap);
            info!(
                "{}: minute {}: {} ({}) not timed here",
                channel.name(),
                input.minute,
                winner.station,
                winner.kind.as_str()
            );
            return out;
        };

        let (spread, doppler) = input
            .characterization
            .map(|ch| (ch.delay_spread_ms as f64, ch.doppler_spread_hz as f64))
            .unwrap_or((0.0, 0.0));
        let sigma = self
            .uncertainty
            .sigma_ms(detection.snr_db as f64, spread, doppler);
        out.candidates = self.candidates(winner.station, detection.toa_ms, sigma);

        let Some(best) = out.candidates.first().copied() else {
            out.status = SolutionStatus::LowConfidence;
            out.confidence = winner.confidence.min(self.policy.low_confidence_cap);
            info!(
                "{}: minute {}: no feasible path from {}",
                channel.name(),
                input.minute,
                winner.station
            );
            return out;
        };

        let z = best.residual_ms.abs() / sigma.max(f64::EPSILON);
        let confidence = (winner.confidence as f64 / (1.0 + z / 3.0)) as f32;
        if winner.kind.is_tentative() {
            out.status = SolutionStatus::LowConfidence;
            out.confidence = confidence.min(self.policy.low_confidence_cap);
        } else {
            out.status = SolutionStatus::Solved;
            out.confidence = confidence;
        }
        out.nist_offset_ms = Some(best.residual_ms);
        out.emission_offset_ms = Some(best.emission_offset_ms);
        out.propagation_delay_ms = Some(best.propagation_delay_ms);
        out.mode = Some(best.mode);
        out.hop_count = Some(best.mode.hops);
        out.layer_height_km = Some(best.layer_height_km);
        out.uncertainty_ms = Some(sigma);

        info!(
            "{}: minute {}: {} via {}, delay {:.3} ms, offset {:+.3} ± {:.3} ms{}",
            channel.name(),
            input.minute,
            winner.station,
            best.mode,
            best.propagation_delay_ms,
            best.residual_ms,
            sigma,
            if out.verified { " (verified)" } else { "" }
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use chrono::{TimeZone, Utc};

    use crate::discriminator::ConfidenceTier;
    use crate::voter::AnchorQuality;

    const MINUTE: MinuteKey = MinuteKey(28_000_000);

    fn receiver() -> SiteLocation {
        SiteLocation::new(39.0, -77.0)
    }

    fn channel() -> ChannelInfo {
        ChannelInfo::standard("WWV_10", 10.0e6).unwrap()
    }

    fn characterization(station: Station, tier: ConfidenceTier) -> ChannelCharacterization {
        ChannelCharacterization {
            minute: MINUTE,
            channel: "WWV_10".to_owned(),
            snr_db: 30.0,
            delay_spread_ms: 0.0,
            doppler_spread_hz: 0.0,
            dominant: Some(station),
            tier,
            ground_truth: (tier == ConfidenceTier::GroundTruth).then_some(station),
        }
    }

    fn detection(station: Station, toa_ms: f64) -> StationDetection {
        StationDetection {
            station,
            frequency_hz: station.minute_tone_hz(),
            amplitude: 0.3,
            power_db: -10.5,
            snr_db: 30.0,
            toa_samples: toa_ms * 16.0,
            toa_ms,
            rise_ms: 4.0,
        }
    }

    fn anchor(station: Station, quality: AnchorQuality) -> StationAnchor {
        StationAnchor {
            minute: MINUTE,
            channel: "WWV_15".to_owned(),
            station,
            toa_offset_samples: 0,
            snr_db: 25.0,
            confidence: 0.9,
            quality,
            written_at: Utc.with_ymd_and_hms(2023, 3, 26, 10, 0, 0).unwrap(),
        }
    }

    fn delay_of(station: Station, label: &str) -> f64 {
        let km = station.site().distance_km(&receiver());
        ModeSearch::default()
            .paths(km)
            .into_iter()
            .find(|p| p.mode.label() == label)
            .unwrap()
            .delay_ms
    }

    #[test]
    fn test_unresolved() {
        let ch = channel();
        let mut uut = TemporalEngine::new(receiver());
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: None,
            detections: &[],
            anchor: None,
            prediction: None,
        });
        assert_eq!(SolutionStatus::Unresolved, sol.status);
        assert_eq!(None, sol.station);
        assert_eq!(0.0, sol.confidence);
        assert_eq!(None, sol.nist_offset_ms);
        assert_eq!(None, sol.propagation_delay_ms);
        assert_eq!(None, sol.mode_label());
        assert!(sol.candidates.is_empty());

        // a tentative prediction alone is still a decision
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: None,
            detections: &[],
            anchor: None,
            prediction: Some(Prediction {
                station: Station::Wwvh,
                probability: 0.6,
            }),
        });
        assert_eq!(SolutionStatus::LowConfidence, sol.status);
        assert_eq!(EvidenceKind::TentativePrediction, sol.evidence);
    }

    #[test]
    fn test_tentative_prediction_timed() {
        // the local decision was demoted away; only a weak hunch remains
        let ch = channel();
        let local = characterization(Station::Wwvh, ConfidenceTier::None);
        let dets = [detection(Station::Wwvh, delay_of(Station::Wwvh, "2F2"))];
        let mut uut = TemporalEngine::new(receiver());
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: None,
            prediction: Some(Prediction {
                station: Station::Wwvh,
                probability: 0.6,
            }),
        });
        assert_eq!(Some(Station::Wwvh), sol.station);
        assert_eq!(EvidenceKind::TentativePrediction, sol.evidence);
        assert_eq!(SolutionStatus::LowConfidence, sol.status);
        assert!(sol.confidence <= 0.3, "confidence {}", sol.confidence);
        assert_eq!(Some("2F2".to_owned()), sol.mode_label());
        assert!(!sol.verified);
    }

    #[test]
    fn test_prediction_overrides_medium() {
        let ch = channel();
        let local = characterization(Station::Wwvh, ConfidenceTier::Medium);
        let dets = [detection(Station::Wwvh, 20.0)];
        let mut uut = TemporalEngine::new(receiver());
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: None,
            prediction: Some(Prediction {
                station: Station::Wwv,
                probability: 0.9,
            }),
        });
        assert_eq!(Some(Station::Wwv), sol.station);
        assert_eq!(EvidenceKind::ConfidentPrediction, sol.evidence);

        // WWV was not timed on this channel
        assert_eq!(SolutionStatus::LowConfidence, sol.status);
        assert!(sol.confidence <= 0.3);
        assert_eq!(None, sol.nist_offset_ms);
        assert!(!sol.verified);
    }

    #[test]
    fn test_consistent_mode() {
        let ch = channel();
        let arrival = delay_of(Station::Wwv, "2F2");
        let local = characterization(Station::Wwv, ConfidenceTier::Strong);
        let dets = [detection(Station::Wwv, arrival)];
        let mut uut = TemporalEngine::new(receiver());
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: None,
            prediction: None,
        });

        assert_eq!(SolutionStatus::Solved, sol.status);
        assert_eq!(Some(Station::Wwv), sol.station);
        assert_eq!(EvidenceKind::StrongAcoustic, sol.evidence);
        assert_eq!(Some("2F2".to_owned()), sol.mode_label());
        assert_eq!(Some(2), sol.hop_count);
        assert_approx_eq!(F2_LAYER_KM, sol.layer_height_km.unwrap());
        assert_approx_eq!(0.0, sol.nist_offset_ms.unwrap(), 1.0e-9);
        assert_approx_eq!(arrival, sol.propagation_delay_ms.unwrap(), 1.0e-9);
        assert_approx_eq!(0.9f32, sol.confidence, 1.0e-6);
        assert!(!sol.verified);
        assert!(sol.candidates.len() > 1);
        for pair in sol.candidates.windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }

        // corroborated by another channel
        let other = anchor(Station::Wwv, AnchorQuality::HighConfidenceAcoustic);
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: Some(&other),
            prediction: None,
        });
        assert!(sol.verified);

        // an arrival 2 ms late is explained with an offset
        let dets = [detection(Station::Wwv, arrival + 2.0)];
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: None,
            prediction: None,
        });
        assert_eq!(SolutionStatus::Solved, sol.status);
        assert!(sol.confidence < 0.9);
    }

    #[test]
    fn test_ground_truth_and_borrowed() {
        let ch = channel();
        let local = characterization(Station::Wwvh, ConfidenceTier::GroundTruth);
        let dets = [detection(Station::Wwvh, delay_of(Station::Wwvh, "3F2"))];
        let mut uut = TemporalEngine::new(receiver());
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: Some(&anchor(Station::Wwv, AnchorQuality::VerifiedGroundTruth)),
            prediction: None,
        });
        assert_eq!(Some(Station::Wwvh), sol.station);
        assert_eq!(EvidenceKind::GroundTruth, sol.evidence);
        assert!(sol.verified);
        assert_eq!(Some("3F2".to_owned()), sol.mode_label());

        // a borrowed anchor beats weak local evidence
        let local = characterization(Station::Wwvh, ConfidenceTier::Weak);
        let dets = [
            detection(Station::Wwvh, 30.0),
            detection(Station::Wwv, delay_of(Station::Wwv, "1F2")),
        ];
        let sol = uut.solve(&SolverInput {
            minute: MINUTE,
            channel: &ch,
            characterization: Some(&local),
            detections: &dets,
            anchor: Some(&anchor(Station::Wwv, AnchorQuality::HighConfidenceAcoustic)),
            prediction: None,
        });
        assert_eq!(Some(Station::Wwv), sol.station);
        assert_eq!(EvidenceKind::BorrowedHighConfidence, sol.evidence);
        assert_eq!(SolutionStatus::Solved, sol.status);
        assert_eq!(Some("1F2".to_owned()), sol.mode_label());
        assert!(!sol.verified);
    }

    #[test]
    fn test_uncertainty_enters_solution() {
        let mut quiet = characterization(Station::Wwv, ConfidenceTier::Strong);
        let arrival = delay_of(Station::Wwv, "2F2");
        let mut weak = detection(Station::Wwv, arrival);
        weak.snr_db = 10.0;
        let mut strong = weak;
        strong.snr_db = 30.0;

        let mut uut = TemporalEngine::new(receiver());
        let mut sigma = |det: StationDetection, ch: &ChannelCharacterization| {
            let dets = [det];
            uut.solve(&SolverInput {
                minute: MINUTE,
                channel: &channel(),
                characterization: Some(ch),
                detections: &dets,
                anchor: None,
                prediction: None,
            })
            .uncertainty_ms
            .unwrap()
        };
        assert!(sigma(strong, &quiet) < sigma(weak, &quiet));

        let narrow = sigma(strong, &quiet);
        quiet.delay_spread_ms = 5.0;
        assert!(sigma(strong, &quiet) > narrow);
    }
}
