//! Per-channel processing
//!
//! A [`ChannelPipeline`] owns everything one channel needs:
//! ingestion, discrimination, the solver, and the channel's
//! station predictor. Other channels are reached only through
//! the shared [`GlobalVoter`] store. Each completed minute
//! runs through:
//!
//! 1. discrimination
//! 2. the best anchor published by *another* channel
//! 3. the historical prediction
//! 4. the solver
//! 5. publication of this channel's own decision, unless it
//!    was borrowed
//! 6. predictor update and pruning of old anchors
//!
//! and yields a [`MinuteReport`].

use std::path::PathBuf;

#[cfg(not(test))]
use log::{debug, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as warn;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveRecord;
use crate::clock::MinuteKey;
use crate::discriminator::{ChannelCharacterization, Discrimination, Discriminator};
use crate::engine::{
    HistoricalPredictor, Solver, SolverInput, StationPredictor, TransmissionSolution,
};
use crate::ingest::{IngestStats, MinuteWindow, StreamIngest};
use crate::station::{ChannelInfo, Station};
use crate::voter::{GlobalVoter, StationAnchor, VoterError};

/// Everything decided about one channel-minute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinuteReport {
    /// Minute
    pub minute: MinuteKey,

    /// Channel name
    pub channel: String,

    /// Discriminator output
    pub discrimination: Discrimination,

    /// Station and transmission time
    pub solution: TransmissionSolution,

    /// Decimated samples and metadata
    pub archive: ArchiveRecord,
}

impl MinuteReport {
    /// Channel snapshot, if the minute was discriminated
    pub fn characterization(&self) -> Option<&ChannelCharacterization> {
        self.discrimination.characterization()
    }
}

/// Processing chain for one channel
///
/// Create with a
/// [`ChannelPipelineBuilder`](crate::ChannelPipelineBuilder).
pub struct ChannelPipeline {
    channel: ChannelInfo,
    ingest: StreamIngest,
    discriminator: Box<dyn Discriminator + Send>,
    solver: Box<dyn Solver + Send>,
    predictor: HistoricalPredictor,
    predictor_path: Option<PathBuf>,
    voter: Option<GlobalVoter>,
    retention_minutes: i64,
}

impl ChannelPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: ChannelInfo,
        ingest: StreamIngest,
        discriminator: Box<dyn Discriminator + Send>,
        solver: Box<dyn Solver + Send>,
        predictor: HistoricalPredictor,
        predictor_path: Option<PathBuf>,
        voter: Option<GlobalVoter>,
        retention_minutes: i64,
    ) -> Self {
        Self {
            channel,
            ingest,
            discriminator,
            solver,
            predictor,
            predictor_path,
            voter,
            retention_minutes,
        }
    }

    /// Process one datagram
    ///
    /// Returns a report for every minute the datagram
    /// completes. See [`StreamIngest::push_packet`].
    pub fn push_packet(&mut self, buf: &[u8], now: DateTime<Utc>) -> Vec<MinuteReport> {
        let windows = self.ingest.push_packet(buf, now);
        windows.iter().map(|win| self.process_window(win)).collect()
    }

    /// End the stream, reporting any partial minute
    pub fn finish(&mut self) -> Vec<MinuteReport> {
        let windows = self.ingest.finish();
        windows.iter().map(|win| self.process_window(win)).collect()
    }

    /// Run one completed minute through the chain
    ///
    /// Failures of the voter store or the predictor file are
    /// logged and otherwise ignored: the channel carries on
    /// alone.
    pub fn process_window(&mut self, window: &MinuteWindow) -> MinuteReport {
        let minute = window.key();
        let discrimination = self.discriminator.discriminate(window);

        let anchor = self.voter.as_ref().and_then(|voter| {
            voter
                .best_anchor(minute, Some(self.channel.name()))
                .unwrap_or_else(|e| {
                    warn!("{}: unable to read anchors: {}", self.channel.name(), e);
                    None
                })
        });
        let prediction = self.predictor.predict(&self.channel, minute);

        let input = SolverInput {
            minute,
            channel: &self.channel,
            characterization: discrimination.characterization(),
            detections: discrimination.detections(),
            anchor: anchor.as_ref(),
            prediction,
        };
        let solution = self.solver.solve(&input);

        if let Some(station) = solution.station {
            self.publish(&solution, &discrimination, station);
            self.predictor.observe(minute, station, solution.evidence);
            if let Err(e) = self.save_predictor() {
                warn!("{}: unable to save predictor: {}", self.channel.name(), e);
            }
        }
        if let Some(voter) = &self.voter {
            if let Err(e) = voter.prune(minute, self.retention_minutes) {
                warn!("{}: unable to prune anchors: {}", self.channel.name(), e);
            }
        }

        let archive = ArchiveRecord::new(&self.channel, window, discrimination.tone_powers());
        MinuteReport {
            minute,
            channel: self.channel.name().to_owned(),
            discrimination,
            solution,
            archive,
        }
    }

    /// Save the station predictor, if it has a file
    pub fn save_predictor(&self) -> Result<(), VoterError> {
        match &self.predictor_path {
            Some(path) => self.predictor.save(path),
            None => Ok(()),
        }
    }

    /// Channel
    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    /// Ingestion counters
    pub fn stats(&self) -> &IngestStats {
        self.ingest.stats()
    }

    /// Station predictor
    pub fn predictor(&self) -> &HistoricalPredictor {
        &self.predictor
    }

    /// Shared anchor store, if any
    pub fn voter(&self) -> Option<&GlobalVoter> {
        self.voter.as_ref()
    }

    fn publish(&self, solution: &TransmissionSolution, discrimination: &Discrimination, station: Station) {
        let (Some(voter), Some(quality)) = (&self.voter, solution.evidence.anchor_quality()) else {
            return;
        };
        let detection = discrimination.detection(station);
        let anchor = StationAnchor {
            minute: solution.minute,
            channel: self.channel.name().to_owned(),
            station,
            toa_offset_samples: detection.map(|d| d.toa_samples.round() as i64).unwrap_or(0),
            snr_db: detection
                .map(|d| d.snr_db)
                .or_else(|| discrimination.characterization().map(|ch| ch.snr_db))
                .unwrap_or(0.0),
            confidence: solution.confidence,
            quality,
            written_at: Utc::now(),
        };
        match voter.publish(&anchor) {
            Ok(path) => debug!(
                "{}: published {} anchor to {}",
                self.channel.name(),
                station,
                path.display()
            ),
            Err(e) => warn!("{}: unable to publish anchor: {}", self.channel.name(), e),
        }
    }
}
