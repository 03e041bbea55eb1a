//! Historical station prediction

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::selection::{EvidenceKind, Prediction};
use crate::clock::MinuteKey;
use crate::station::{ChannelInfo, Station};
use crate::voter::{read_json, write_json_atomic, VoterError};

const HOURS: usize = 24;

/// Predicts the dominant station from history
pub trait StationPredictor {
    /// Most likely station on `channel` during `minute`
    ///
    /// Returns `None` without enough history.
    fn predict(&self, channel: &ChannelInfo, minute: MinuteKey) -> Option<Prediction>;

    /// Record the station selected for `minute`
    ///
    /// Implementations should learn only from evidence they did
    /// not themselves produce.
    fn observe(&mut self, minute: MinuteKey, station: Station, kind: EvidenceKind);
}

/// Exponentially-decayed station tally per hour of the day
///
/// Propagation follows the sun, so the station which dominates
/// a frequency tends to repeat from day to day at the same
/// hour. Each hour keeps a weight per station. Every acoustic
/// observation decays that hour's weights by `decay` and adds
/// one to the observed station.
///
/// Decisions which came from a prediction are not learned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPredictor {
    decay: f64,
    min_weight: f64,
    tallies: Vec<[f64; 3]>,
}

impl Default for HistoricalPredictor {
    fn default() -> Self {
        Self::new(0.95, 3.0)
    }
}

impl HistoricalPredictor {
    /// Empty predictor
    ///
    /// Predictions require a total weight of at least
    /// `min_weight` for the hour.
    pub fn new(decay: f64, min_weight: f64) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
            min_weight: min_weight.max(0.0),
            tallies: vec![[0.0; 3]; HOURS],
        }
    }

    /// Load saved state
    pub fn load<P>(path: P) -> Result<Self, VoterError>
    where
        P: AsRef<Path>,
    {
        let mut out: Self = read_json(path.as_ref())?;
        out.tallies.resize(HOURS, [0.0; 3]);
        Ok(out)
    }

    /// Save state, atomically replacing any earlier file
    pub fn save<P>(&self, path: P) -> Result<(), VoterError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", std::process::id()));
        write_json_atomic(path, Path::new(&tmp), self)
    }

    /// Weight of `station` during `hour`
    pub fn weight(&self, hour: u32, station: Station) -> f64 {
        self.tallies
            .get(hour as usize)
            .map(|t| t[station_index(station)])
            .unwrap_or(0.0)
    }
}

impl StationPredictor for HistoricalPredictor {
    fn predict(&self, channel: &ChannelInfo, minute: MinuteKey) -> Option<Prediction> {
        let hour = minute.hour_of_day();
        let total: f64 = channel.stations().iter().map(|st| self.weight(hour, *st)).sum();
        if total <= 0.0 || total < self.min_weight {
            return None;
        }
        let (station, weight) = channel
            .stations()
            .iter()
            .map(|st| (*st, self.weight(hour, *st)))
            .reduce(|best, next| if next.1 > best.1 { next } else { best })?;
        Some(Prediction {
            station,
            probability: (weight / total) as f32,
        })
    }

    fn observe(&mut self, minute: MinuteKey, station: Station, kind: EvidenceKind) {
        if !kind.is_acoustic() {
            return;
        }
        if let Some(tally) = self.tallies.get_mut(minute.hour_of_day() as usize) {
            for w in tally.iter_mut() {
                *w *= self.decay;
            }
            tally[station_index(station)] += 1.0;
        }
    }
}

fn station_index(station: Station) -> usize {
    match station {
        Station::Wwv => 0,
        Station::Wwvh => 1,
        Station::Chu => 2,
    }
}
