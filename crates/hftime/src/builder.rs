use std::path::{Path, PathBuf};

#[cfg(not(test))]
use log::warn;

#[cfg(test)]
use std::println as warn;

use thiserror::Error;

use crate::discriminator::{Discriminator, StationDiscriminator, TimecodeParams};
use crate::engine::{
    HistoricalPredictor, SelectionPolicy, Solver, TemporalEngine, UncertaintyModel,
};
use crate::ingest::{IqOrder, StreamIngest, DEFAULT_MAX_FILL_SECS};
use crate::pipeline::ChannelPipeline;
use crate::resample::{Resampler, TRANSITION_RANGE};
use crate::station::{ChannelError, ChannelInfo, SiteLocation};
use crate::voter::{GlobalVoter, VoterError, DEFAULT_RETENTION_MINUTES};

/// Builds a decimating resampler
///
/// The default is two stages of 40, which takes 16 kHz down
/// to 10 Hz, with a transition band of 20% of each stage's
/// output bandwidth.
#[derive(Clone, Debug, PartialEq)]
pub struct ResamplerBuilder {
    ratios: Vec<u32>,
    transition: f64,
}

impl ResamplerBuilder {
    /// Resampler with the given per-stage ratios
    pub fn new(ratios: &[u32]) -> Self {
        Self {
            ratios: ratios.to_vec(),
            transition: 0.2,
        }
    }

    /// Build a resampler
    pub fn build(&self) -> Resampler {
        Resampler::new(&self.ratios, self.transition)
    }

    /// Per-stage decimation ratios, applied in order
    pub fn with_ratios(&mut self, ratios: &[u32]) -> &mut Self {
        self.ratios = ratios.to_vec();
        self
    }

    /// Transition bandwidth (fraction of output bandwidth)
    ///
    /// Each stage's low-pass filter rolls off over this
    /// fraction of the stage's output Nyquist band, ending at
    /// Nyquist. Narrower transitions need longer filters and
    /// more lookahead. Clamped to [`TRANSITION_RANGE`].
    pub fn with_transition(&mut self, transition: f64) -> &mut Self {
        self.transition = f64::clamp(transition, TRANSITION_RANGE.0, TRANSITION_RANGE.1);
        self
    }

    /// Per-stage ratios
    pub fn ratios(&self) -> &[u32] {
        &self.ratios
    }

    /// Transition bandwidth
    pub fn transition(&self) -> f64 {
        self.transition
    }

    /// Product of the stage ratios
    pub fn total_ratio(&self) -> u64 {
        self.ratios.iter().map(|r| *r as u64).product()
    }
}

impl Default for ResamplerBuilder {
    fn default() -> Self {
        Self::new(&[40, 40])
    }
}

/// Builds a station discriminator
///
/// Holds every detection threshold. The defaults suit a
/// 16 kHz native rate, but any rate above twice the highest
/// guard frequency works.
///
/// As with the other builders, the setters are part of the
/// API but the default values are not.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscriminatorBuilder {
    tone_template_secs: f32,
    taper_alpha: f64,
    guard_hz: Vec<f32>,
    tone_search_ms: f32,
    edge_ms: f32,
    edge_reach_ms: f32,
    dc_block_hz: f32,
    detection_snr_db: f32,
    medium_snr_db: f32,
    strong_snr_db: f32,
    strong_margin_db: f32,
    medium_margin_db: f32,
    ground_truth_snr_db: f32,
    min_completeness: f64,
    timecode: TimecodeParams,
}

impl DiscriminatorBuilder {
    /// Build a discriminator for `channel` at `sample_rate`
    pub fn build(&self, channel: ChannelInfo, sample_rate: u32) -> StationDiscriminator {
        StationDiscriminator::new(self, channel, sample_rate)
    }

    /// Longest minute-tone template (s)
    ///
    /// Tones shorter than this use their own length.
    pub fn with_tone_template_secs(&mut self, secs: f32) -> &mut Self {
        self.tone_template_secs = f32::clamp(secs, 0.01, 1.0);
        self
    }

    /// Fraction of the tone template given to cosine tapers
    pub fn with_taper_alpha(&mut self, alpha: f64) -> &mut Self {
        self.taper_alpha = f64::clamp(alpha, 0.0, 1.0);
        self
    }

    /// Noise reference frequencies (Hz)
    pub fn with_guard_frequencies(&mut self, guard_hz: &[f32]) -> &mut Self {
        self.guard_hz = guard_hz.to_vec();
        self
    }

    /// Latest tone onset searched (ms after the minute)
    pub fn with_tone_search_ms(&mut self, ms: f32) -> &mut Self {
        self.tone_search_ms = ms.max(0.0);
        self
    }

    /// Leading-edge detector window and reach (ms)
    ///
    /// The edge is sought within `reach_ms` of the matched
    /// filter peak, using a sliding window of `edge_ms`. The
    /// ideal 10–90% rise is 80% of `edge_ms`.
    pub fn with_edge(&mut self, edge_ms: f32, reach_ms: f32) -> &mut Self {
        self.edge_ms = edge_ms.max(0.1);
        self.edge_reach_ms = reach_ms.max(self.edge_ms);
        self
    }

    /// DC-blocker notch spacing (Hz)
    ///
    /// The envelope's DC blocker averages over
    /// `1 / dc_block_hz` seconds.
    pub fn with_dc_block_hz(&mut self, hz: f32) -> &mut Self {
        self.dc_block_hz = hz.max(1.0);
        self
    }

    /// Tone detection threshold (dB SNR)
    pub fn with_detection_snr_db(&mut self, db: f32) -> &mut Self {
        self.detection_snr_db = db;
        self
    }

    /// SNR for `Medium` and `Strong` tiers (dB)
    ///
    /// On shared channels only `strong` applies.
    pub fn with_snr_tiers(&mut self, medium: f32, strong: f32) -> &mut Self {
        self.medium_snr_db = medium;
        self.strong_snr_db = f32::max(strong, medium);
        self
    }

    /// Tone-power margin for `Strong` and `Medium` tiers (dB)
    ///
    /// Shared channels only.
    pub fn with_margin_db(&mut self, strong: f32, medium: f32) -> &mut Self {
        self.strong_margin_db = strong;
        self.medium_margin_db = f32::min(medium, strong);
        self
    }

    /// Identification tone threshold (dB SNR)
    pub fn with_ground_truth_snr_db(&mut self, db: f32) -> &mut Self {
        self.ground_truth_snr_db = db;
        self
    }

    /// Smallest fraction of received samples worth examining
    pub fn with_min_completeness(&mut self, fraction: f64) -> &mut Self {
        self.min_completeness = f64::clamp(fraction, 0.0, 1.0);
        self
    }

    /// Time-code correlation tuning
    pub fn with_timecode(&mut self, params: TimecodeParams) -> &mut Self {
        self.timecode = params;
        self
    }

    /// Longest minute-tone template (s)
    pub fn tone_template_secs(&self) -> f32 {
        self.tone_template_secs
    }

    /// Taper fraction
    pub fn taper_alpha(&self) -> f64 {
        self.taper_alpha
    }

    /// Noise reference frequencies (Hz)
    pub fn guard_hz(&self) -> &[f32] {
        &self.guard_hz
    }

    /// Latest tone onset searched (ms)
    pub fn tone_search_ms(&self) -> f32 {
        self.tone_search_ms
    }

    /// Leading-edge window (ms)
    pub fn edge_ms(&self) -> f32 {
        self.edge_ms
    }

    /// Leading-edge reach (ms)
    pub fn edge_reach_ms(&self) -> f32 {
        self.edge_reach_ms
    }

    /// DC-blocker notch spacing (Hz)
    pub fn dc_block_hz(&self) -> f32 {
        self.dc_block_hz
    }

    /// Detection threshold (dB)
    pub fn detection_snr_db(&self) -> f32 {
        self.detection_snr_db
    }

    /// `Medium` tier SNR (dB)
    pub fn medium_snr_db(&self) -> f32 {
        self.medium_snr_db
    }

    /// `Strong` tier SNR (dB)
    pub fn strong_snr_db(&self) -> f32 {
        self.strong_snr_db
    }

    /// Shared-channel margins `(strong, medium)` (dB)
    pub fn margin_db(&self) -> (f32, f32) {
        (self.strong_margin_db, self.medium_margin_db)
    }

    /// Identification tone threshold (dB)
    pub fn ground_truth_snr_db(&self) -> f32 {
        self.ground_truth_snr_db
    }

    /// Minimum completeness
    pub fn min_completeness(&self) -> f64 {
        self.min_completeness
    }

    /// Time-code tuning
    pub fn timecode(&self) -> TimecodeParams {
        self.timecode
    }
}

impl Default for DiscriminatorBuilder {
    fn default() -> Self {
        Self {
            tone_template_secs: 0.8,
            taper_alpha: 0.2,
            guard_hz: vec![850.0, 1100.0, 1350.0, 1500.0],
            tone_search_ms: 100.0,
            edge_ms: 5.0,
            edge_reach_ms: 40.0,
            dc_block_hz: 40.0,
            detection_snr_db: 6.0,
            medium_snr_db: 10.0,
            strong_snr_db: 20.0,
            strong_margin_db: 10.0,
            medium_margin_db: 3.0,
            ground_truth_snr_db: 10.0,
            min_completeness: 0.5,
            timecode: TimecodeParams::default(),
        }
    }
}

/// Builds a per-channel pipeline
///
/// You must provide the channel and its native sample rate.
/// Everything else has a default. Without a voter directory
/// the pipeline works alone; without a receiver location it
/// assumes the receiver is at (0, 0), which makes its
/// propagation delays meaningless.
#[derive(Clone, Debug)]
pub struct ChannelPipelineBuilder {
    channel: ChannelInfo,
    sample_rate: u32,
    resampler: ResamplerBuilder,
    discriminator: DiscriminatorBuilder,
    source_id: Option<u32>,
    iq_order: IqOrder,
    max_fill_secs: u32,
    voter_dir: Option<PathBuf>,
    retention_minutes: i64,
    receiver: SiteLocation,
    policy: SelectionPolicy,
    uncertainty: UncertaintyModel,
    hop_penalty: f64,
    predictor_path: Option<PathBuf>,
}

impl ChannelPipelineBuilder {
    /// New pipeline for `channel` at `sample_rate` Hz
    pub fn new(channel: ChannelInfo, sample_rate: u32) -> Self {
        Self {
            channel,
            sample_rate,
            resampler: ResamplerBuilder::default(),
            discriminator: DiscriminatorBuilder::default(),
            source_id: None,
            iq_order: IqOrder::default(),
            max_fill_secs: DEFAULT_MAX_FILL_SECS,
            voter_dir: None,
            retention_minutes: DEFAULT_RETENTION_MINUTES,
            receiver: SiteLocation::new(0.0, 0.0),
            policy: SelectionPolicy::default(),
            uncertainty: UncertaintyModel::default(),
            hop_penalty: 0.5,
            predictor_path: None,
        }
    }

    /// Build the pipeline with the standard discriminator and
    /// solver
    ///
    /// Fails if the resampler does not divide a minute evenly
    /// or if the voter directory cannot be created.
    pub fn build(&self) -> Result<ChannelPipeline, BuildError> {
        let discriminator = self.discriminator.build(self.channel.clone(), self.sample_rate);
        let solver = TemporalEngine::new(self.receiver)
            .with_policy(self.policy)
            .with_uncertainty(self.uncertainty)
            .with_hop_penalty(self.hop_penalty);
        self.build_with(Box::new(discriminator), Box::new(solver))
    }

    /// Build the pipeline around your own discriminator and
    /// solver
    pub fn build_with(
        &self,
        discriminator: Box<dyn Discriminator + Send>,
        solver: Box<dyn Solver + Send>,
    ) -> Result<ChannelPipeline, BuildError> {
        let mut ingest = StreamIngest::new(self.sample_rate, self.resampler.build())?;
        ingest
            .with_source_id(self.source_id)
            .with_iq_order(self.iq_order)
            .with_max_fill_secs(self.max_fill_secs);

        let voter = match &self.voter_dir {
            Some(dir) => Some(GlobalVoter::open(dir.clone())?),
            None => None,
        };
        let predictor = match &self.predictor_path {
            Some(path) => load_predictor(path),
            None => HistoricalPredictor::default(),
        };

        Ok(ChannelPipeline::new(
            self.channel.clone(),
            ingest,
            discriminator,
            solver,
            predictor,
            self.predictor_path.clone(),
            voter,
            self.retention_minutes,
        ))
    }

    /// Decimating resampler
    pub fn with_resampler(&mut self, resampler: &ResamplerBuilder) -> &mut Self {
        self.resampler = resampler.clone();
        self
    }

    /// Discriminator thresholds
    pub fn with_discriminator(&mut self, discriminator: &DiscriminatorBuilder) -> &mut Self {
        self.discriminator = discriminator.clone();
        self
    }

    /// Accept only this stream source
    ///
    /// If `None`, the first valid packet's source is adopted.
    pub fn with_source_id(&mut self, source_id: Option<u32>) -> &mut Self {
        self.source_id = source_id;
        self
    }

    /// Sample pair component order
    pub fn with_iq_order(&mut self, order: IqOrder) -> &mut Self {
        self.iq_order = order;
        self
    }

    /// Largest gap which is zero-filled (s)
    pub fn with_max_fill_secs(&mut self, secs: u32) -> &mut Self {
        self.max_fill_secs = secs.max(1);
        self
    }

    /// Share anchors through the store at `dir`
    pub fn with_voter_dir<P>(&mut self, dir: P) -> &mut Self
    where
        P: Into<PathBuf>,
    {
        self.voter_dir = Some(dir.into());
        self
    }

    /// Keep this many minutes of anchors (minutes)
    pub fn with_retention_minutes(&mut self, minutes: i64) -> &mut Self {
        self.retention_minutes = minutes.max(1);
        self
    }

    /// Receiver location
    pub fn with_receiver(&mut self, receiver: SiteLocation) -> &mut Self {
        self.receiver = receiver;
        self
    }

    /// Station selection thresholds
    pub fn with_selection_policy(&mut self, policy: SelectionPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Timing uncertainty model
    pub fn with_uncertainty(&mut self, uncertainty: UncertaintyModel) -> &mut Self {
        self.uncertainty = uncertainty;
        self
    }

    /// Mode-search score per hop
    pub fn with_hop_penalty(&mut self, penalty: f64) -> &mut Self {
        self.hop_penalty = penalty.max(0.0);
        self
    }

    /// Load and save the station predictor at `path`
    pub fn with_predictor_path<P>(&mut self, path: P) -> &mut Self
    where
        P: Into<PathBuf>,
    {
        self.predictor_path = Some(path.into());
        self
    }

    /// Channel
    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    /// Native sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Resampler
    pub fn resampler(&self) -> &ResamplerBuilder {
        &self.resampler
    }

    /// Discriminator thresholds
    pub fn discriminator(&self) -> &DiscriminatorBuilder {
        &self.discriminator
    }

    /// Voter directory
    pub fn voter_dir(&self) -> Option<&Path> {
        self.voter_dir.as_deref()
    }

    /// Receiver location
    pub fn receiver(&self) -> &SiteLocation {
        &self.receiver
    }
}

/// Invalid configuration
#[derive(Error, Debug)]
pub enum BuildError {
    /// Sample rate of zero
    #[error("sample rate must be positive")]
    ZeroSampleRate,

    /// Decimation does not divide one minute of samples
    #[error("{samples_per_minute} samples per minute is not a multiple of the decimation ratio {ratio}")]
    RatioMismatch {
        /// Native samples per minute
        samples_per_minute: u64,

        /// Total decimation ratio
        ratio: u64,
    },

    /// Invalid channel
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Voter store unavailable
    #[error("voter store: {0}")]
    Voter(#[from] VoterError),
}

// A missing file is a fresh start; a bad one is too, loudly.
fn load_predictor(path: &Path) -> HistoricalPredictor {
    match HistoricalPredictor::load(path) {
        Ok(pred) => pred,
        Err(VoterError::Io(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
            HistoricalPredictor::default()
        }
        Err(e) => {
            warn!("ignoring saved predictor: {}", e);
            HistoricalPredictor::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_builder() {
        let mut uut = ResamplerBuilder::default();
        assert_eq!(&[40, 40], uut.ratios());
        assert_eq!(1600, uut.total_ratio());
        uut.with_ratios(&[8, 5]).with_transition(5.0);
        assert_eq!(TRANSITION_RANGE.1, uut.transition());
        let built = uut.build();
        assert_eq!(40, built.ratio());

        // the builder reports the bound the stages are designed with
        let widest = crate::resample::DecimationStage::new(8, TRANSITION_RANGE.1);
        assert_eq!(widest.taps(), built.stages()[0].taps());
        uut.with_transition(-1.0);
        assert_eq!(TRANSITION_RANGE.0, uut.transition());
    }

    #[test]
    fn test_discriminator_builder() {
        let mut uut = DiscriminatorBuilder::default();
        uut.with_snr_tiers(12.0, 8.0).with_margin_db(6.0, 9.0);
        assert_eq!(12.0, uut.medium_snr_db());
        assert_eq!(12.0, uut.strong_snr_db());
        assert_eq!((6.0, 6.0), uut.margin_db());
        uut.with_edge(2.0, 1.0);
        assert_eq!(2.0, uut.edge_reach_ms());
    }

    #[test]
    fn test_pipeline_builder() {
        let ch = ChannelInfo::standard("WWV_10", 10.0e6).unwrap();
        assert!(matches!(
            ChannelPipelineBuilder::new(ch.clone(), 16001).build(),
            Err(BuildError::RatioMismatch { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("predictor.json"), b"garbage").unwrap();
        let mut bld = ChannelPipelineBuilder::new(ch, 16000);
        bld.with_voter_dir(dir.path().join("voter"))
            .with_predictor_path(dir.path().join("predictor.json"));
        let pipeline = bld.build().unwrap();
        assert_eq!("WWV_10", pipeline.channel().name());
        assert!(dir.path().join("voter").is_dir());
        assert_eq!(&HistoricalPredictor::default(), pipeline.predictor());
    }
}
