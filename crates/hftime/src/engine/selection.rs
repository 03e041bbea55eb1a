//! Station selection from ranked evidence

use serde::{Deserialize, Serialize};
use strum::EnumMessage;

use crate::discriminator::{ChannelCharacterization, ConfidenceTier};
use crate::station::{ChannelInfo, Station};
use crate::voter::{AnchorQuality, StationAnchor};

/// Kind of evidence for a station decision
///
/// Kinds are totally ordered. The highest kind present wins.
///
/// | rank | kind                     | source                            |
/// |------|--------------------------|-----------------------------------|
/// | 0    | `None`                   | nothing usable                    |
/// | 1    | `TentativePrediction`    | predictor, below threshold        |
/// | 2    | `WeakAcoustic`           | local tier Weak                   |
/// | 3    | `BorrowedLowConfidence`  | anchor: low-confidence guess      |
/// | 4    | `BorrowedPrediction`     | anchor: statistical prediction    |
/// | 5    | `MediumAcoustic`         | local tier Medium                 |
/// | 6    | `ConfidentPrediction`    | predictor, above threshold        |
/// | 7    | `BorrowedHighConfidence` | anchor: high-confidence acoustic  |
/// | 8    | `BorrowedGroundTruth`    | anchor: verified ground truth     |
/// | 9    | `StrongAcoustic`         | local tier Strong                 |
/// | 10   | `GroundTruth`            | local identification tone         |
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumMessage,
)]
pub enum EvidenceKind {
    #[default]
    #[strum(message = "none")]
    None,
    #[strum(message = "tentative prediction")]
    TentativePrediction,
    #[strum(message = "weak acoustic")]
    WeakAcoustic,
    #[strum(message = "borrowed low-confidence")]
    BorrowedLowConfidence,
    #[strum(message = "borrowed prediction")]
    BorrowedPrediction,
    #[strum(message = "medium acoustic")]
    MediumAcoustic,
    #[strum(message = "confident prediction")]
    ConfidentPrediction,
    #[strum(message = "borrowed high-confidence")]
    BorrowedHighConfidence,
    #[strum(message = "borrowed ground truth")]
    BorrowedGroundTruth,
    #[strum(message = "strong acoustic")]
    StrongAcoustic,
    #[strum(message = "ground truth")]
    GroundTruth,
}

impl EvidenceKind {
    /// Position in the ranking, from 0
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Human-readable name
    pub fn as_str(&self) -> &'static str {
        self.get_message().unwrap_or("")
    }

    /// True for evidence heard on this channel
    pub fn is_acoustic(&self) -> bool {
        matches!(
            self,
            EvidenceKind::WeakAcoustic
                | EvidenceKind::MediumAcoustic
                | EvidenceKind::StrongAcoustic
                | EvidenceKind::GroundTruth
        )
    }

    /// True for evidence taken from another channel
    pub fn is_borrowed(&self) -> bool {
        matches!(
            self,
            EvidenceKind::BorrowedLowConfidence
                | EvidenceKind::BorrowedPrediction
                | EvidenceKind::BorrowedHighConfidence
                | EvidenceKind::BorrowedGroundTruth
        )
    }

    /// True for a below-threshold prediction
    ///
    /// Solutions which rest on nothing better are never more
    /// than low-confidence.
    pub fn is_tentative(&self) -> bool {
        *self == EvidenceKind::TentativePrediction
    }

    /// Evidence kind of a local confidence tier
    pub fn from_tier(tier: ConfidenceTier) -> Self {
        match tier {
            ConfidenceTier::None => EvidenceKind::None,
            ConfidenceTier::Weak => EvidenceKind::WeakAcoustic,
            ConfidenceTier::Medium => EvidenceKind::MediumAcoustic,
            ConfidenceTier::Strong => EvidenceKind::StrongAcoustic,
            ConfidenceTier::GroundTruth => EvidenceKind::GroundTruth,
        }
    }

    /// Evidence kind of a borrowed anchor
    pub fn from_anchor(quality: AnchorQuality) -> Self {
        match quality {
            AnchorQuality::LowConfidenceGuess => EvidenceKind::BorrowedLowConfidence,
            AnchorQuality::StatisticalPrediction => EvidenceKind::BorrowedPrediction,
            AnchorQuality::HighConfidenceAcoustic => EvidenceKind::BorrowedHighConfidence,
            AnchorQuality::VerifiedGroundTruth => EvidenceKind::BorrowedGroundTruth,
        }
    }

    /// Quality under which a decision of this kind is published
    ///
    /// Borrowed evidence is never republished, and `None` has
    /// nothing to publish.
    pub fn anchor_quality(&self) -> Option<AnchorQuality> {
        match self {
            EvidenceKind::GroundTruth => Some(AnchorQuality::VerifiedGroundTruth),
            EvidenceKind::StrongAcoustic => Some(AnchorQuality::HighConfidenceAcoustic),
            EvidenceKind::ConfidentPrediction => Some(AnchorQuality::StatisticalPrediction),
            EvidenceKind::MediumAcoustic
            | EvidenceKind::WeakAcoustic
            | EvidenceKind::TentativePrediction => Some(AnchorQuality::LowConfidenceGuess),
            EvidenceKind::None
            | EvidenceKind::BorrowedLowConfidence
            | EvidenceKind::BorrowedPrediction
            | EvidenceKind::BorrowedHighConfidence
            | EvidenceKind::BorrowedGroundTruth => None,
        }
    }
}

/// Historical station prediction
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Most likely station
    pub station: Station,

    /// Probability of `station`, from 0 to 1
    pub probability: f32,
}

/// One piece of classified evidence
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Kind
    pub kind: EvidenceKind,

    /// Station the evidence names
    pub station: Station,

    /// Confidence, from 0 to 1
    pub confidence: f32,
}

/// Thresholds for station selection
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionPolicy {
    /// Predictions above this probability are confident
    pub prediction_threshold: f32,

    /// Confidence assigned to each local tier, from `Weak`
    /// through `GroundTruth`
    pub tier_confidence: [f32; 4],

    /// Solutions without a local tone arrival are capped at
    /// this confidence
    pub low_confidence_cap: f32,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            prediction_threshold: 0.8,
            tier_confidence: [0.4, 0.7, 0.9, 1.0],
            low_confidence_cap: 0.3,
        }
    }
}

impl SelectionPolicy {
    /// Classify the local discriminator's decision
    pub fn classify_local(&self, ch: &ChannelCharacterization) -> Option<Evidence> {
        let station = ch.dominant?;
        let confidence = match ch.tier {
            ConfidenceTier::None => return None,
            ConfidenceTier::Weak => self.tier_confidence[0],
            ConfidenceTier::Medium => self.tier_confidence[1],
            ConfidenceTier::Strong => self.tier_confidence[2],
            ConfidenceTier::GroundTruth => self.tier_confidence[3],
        };
        Some(Evidence {
            kind: EvidenceKind::from_tier(ch.tier),
            station,
            confidence,
        })
    }

    /// Classify another channel's anchor
    ///
    /// Anchors naming a station which `channel` cannot hear
    /// are ignored.
    pub fn classify_anchor(&self, anchor: &StationAnchor, channel: &ChannelInfo) -> Option<Evidence> {
        if !channel.carries(anchor.station) {
            return None;
        }
        Some(Evidence {
            kind: EvidenceKind::from_anchor(anchor.quality),
            station: anchor.station,
            confidence: anchor.confidence.clamp(0.0, 1.0),
        })
    }

    /// Classify a historical prediction
    pub fn classify_prediction(&self, prediction: &Prediction, channel: &ChannelInfo) -> Option<Evidence> {
        if !channel.carries(prediction.station) || prediction.probability <= 0.0 {
            return None;
        }
        let kind = if prediction.probability > self.prediction_threshold {
            EvidenceKind::ConfidentPrediction
        } else {
            EvidenceKind::TentativePrediction
        };
        Some(Evidence {
            kind,
            station: prediction.station,
            confidence: prediction.probability.clamp(0.0, 1.0),
        })
    }

    /// Pick the winning evidence
    ///
    /// The highest kind wins. Ties go to the higher confidence,
    /// then to the station which sorts first.
    pub fn select(&self, evidence: &[Evidence]) -> Option<Evidence> {
        evidence
            .iter()
            .filter(|ev| ev.kind != EvidenceKind::None)
            .max_by(|a, b| {
                a.kind
                    .cmp(&b.kind)
                    .then_with(|| a.confidence.total_cmp(&b.confidence))
                    .then_with(|| b.station.cmp(&a.station))
            })
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::clock::MinuteKey;

    fn shared() -> ChannelInfo {
        ChannelInfo::standard("WWV_5", 5.0e6).unwrap()
    }

    fn characterization(station: Station, tier: ConfidenceTier) -> ChannelCharacterization {
        ChannelCharacterization {
            minute: MinuteKey(1000),
            channel: "WWV_5".to_owned(),
            snr_db: 15.0,
            delay_spread_ms: 0.5,
            doppler_spread_hz: 0.1,
            dominant: Some(station),
            tier,
            ground_truth: None,
        }
    }

    fn anchor(station: Station, quality: AnchorQuality) -> StationAnchor {
        StationAnchor {
            minute: MinuteKey(1000),
            channel: "WWV_10".to_owned(),
            station,
            toa_offset_samples: 0,
            snr_db: 20.0,
            confidence: 0.9,
            quality,
            written_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_rank_order() {
        assert_eq!(0, EvidenceKind::None.rank());
        assert_eq!(6, EvidenceKind::ConfidentPrediction.rank());
        assert_eq!(10, EvidenceKind::GroundTruth.rank());
        assert!(EvidenceKind::TentativePrediction.is_tentative());
        assert!(!EvidenceKind::ConfidentPrediction.is_tentative());
        assert!(!EvidenceKind::WeakAcoustic.is_tentative());
        assert!(EvidenceKind::BorrowedPrediction < EvidenceKind::MediumAcoustic);
        assert!(EvidenceKind::BorrowedGroundTruth < EvidenceKind::StrongAcoustic);
        assert!(EvidenceKind::StrongAcoustic.is_acoustic());
        assert!(!EvidenceKind::ConfidentPrediction.is_acoustic());
        assert!(EvidenceKind::BorrowedGroundTruth.is_borrowed());
        assert_eq!(None, EvidenceKind::BorrowedHighConfidence.anchor_quality());
        assert_eq!("medium acoustic", EvidenceKind::MediumAcoustic.as_str());
    }

    #[test]
    fn test_prediction_overrides_medium() {
        let policy = SelectionPolicy::default();
        let ch = shared();
        let local = policy
            .classify_local(&characterization(Station::Wwvh, ConfidenceTier::Medium))
            .unwrap();
        let pred = policy
            .classify_prediction(
                &Prediction {
                    station: Station::Wwv,
                    probability: 0.9,
                },
                &ch,
            )
            .unwrap();
        assert_eq!(EvidenceKind::ConfidentPrediction, pred.kind);
        let winner = policy.select(&[local, pred]).unwrap();
        assert_eq!(Station::Wwv, winner.station);
        assert_eq!(EvidenceKind::ConfidentPrediction, winner.kind);
    }

    #[test]
    fn test_prediction_never_overrides_strong() {
        let policy = SelectionPolicy::default();
        let ch = shared();
        let local = policy
            .classify_local(&characterization(Station::Wwvh, ConfidenceTier::Strong))
            .unwrap();
        let pred = policy
            .classify_prediction(
                &Prediction {
                    station: Station::Wwv,
                    probability: 0.99,
                },
                &ch,
            )
            .unwrap();
        let borrowed = policy
            .classify_anchor(&anchor(Station::Wwv, AnchorQuality::VerifiedGroundTruth), &ch)
            .unwrap();
        let winner = policy.select(&[pred, borrowed, local]).unwrap();
        assert_eq!(Station::Wwvh, winner.station);
        assert_eq!(EvidenceKind::StrongAcoustic, winner.kind);
    }

    #[test]
    fn test_tentative_and_borrowed() {
        let policy = SelectionPolicy::default();
        let ch = shared();
        let pred = policy
            .classify_prediction(
                &Prediction {
                    station: Station::Wwv,
                    probability: 0.8,
                },
                &ch,
            )
            .unwrap();
        assert_eq!(EvidenceKind::TentativePrediction, pred.kind);

        let weak = policy
            .classify_local(&characterization(Station::Wwv, ConfidenceTier::Weak))
            .unwrap();
        let borrowed = policy
            .classify_anchor(&anchor(Station::Wwvh, AnchorQuality::StatisticalPrediction), &ch)
            .unwrap();
        assert_eq!(
            Station::Wwvh,
            policy.select(&[pred, weak, borrowed]).unwrap().station
        );

        // the anchor names a station this channel cannot hear
        let wwv_only = ChannelInfo::standard("WWV_20", 20.0e6).unwrap();
        assert_eq!(
            None,
            policy.classify_anchor(&anchor(Station::Wwvh, AnchorQuality::VerifiedGroundTruth), &wwv_only)
        );
        assert_eq!(None, policy.select(&[]));
    }

    #[test]
    fn test_ties() {
        let policy = SelectionPolicy::default();
        let a = Evidence {
            kind: EvidenceKind::MediumAcoustic,
            station: Station::Wwvh,
            confidence: 0.7,
        };
        let b = Evidence {
            station: Station::Wwv,
            ..a
        };
        assert_eq!(Station::Wwv, policy.select(&[a, b]).unwrap().station);
        let c = Evidence {
            confidence: 0.75,
            ..a
        };
        assert_eq!(Station::Wwvh, policy.select(&[b, c]).unwrap().station);
    }
}
