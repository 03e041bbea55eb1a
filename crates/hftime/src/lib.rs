//! # hftime: HF time-standard propagation timing
//!
//! This crate measures when the top-of-minute tones of the HF
//! time-standard stations
//!
//! * WWV (Fort Collins, Colorado)
//! * WWVH (Kauai, Hawaii)
//! * CHU (Ottawa, Ontario)
//!
//! arrive at a receiver, decides which station was heard, and
//! infers the ionospheric path the signal took.
//!
//! ## Disclaimer
//!
//! This crate is dual-licensed MIT and Apache 2.0. Read these licenses
//! carefully as they may affect your rights.
//!
//! This crate is not a time source. Do not use it to discipline a
//! clock.
//!
//! ## Example
//!
//! You will need complex baseband IQ samples for one station
//! carrier, delivered as RTP-style datagrams: a 12-byte header
//! followed by big-endian 16-bit sample pairs. Obtaining them is
//! beyond the scope of this crate; any SDR front-end which can
//! emit such a stream will do.
//!
//! ```
//! use hftime::{ChannelInfo, ChannelPipelineBuilder, SiteLocation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let voter_dir = tempfile::tempdir()?;
//! # let datagrams: Vec<Vec<u8>> = Vec::new();
//! // 10 MHz carries both WWV and WWVH
//! let channel = ChannelInfo::standard("WWV_10", 10.0e6)?;
//!
//! let mut pipeline = ChannelPipelineBuilder::new(channel, 16000)
//!     .with_receiver(SiteLocation::new(39.0, -77.0))   // receiver lat, lon
//!     .with_voter_dir(voter_dir.path())                // shared with other channels
//!     .build()?;
//!
//! for dgram in &datagrams {
//!     for report in pipeline.push_packet(dgram, chrono::Utc::now()) {
//!         println!("{}: {:?}", report.minute, report.solution.station);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Each [`ChannelPipeline`] handles one carrier. Run one per
//! carrier, in as many threads or processes as you like, and
//! give them all the same voter directory. A channel which
//! cannot tell the stations apart borrows the decision of a
//! channel which can.
//!
//! ## Background
//!
//! WWV and WWVH share the 2.5, 5, 10, and 15 MHz carriers.
//! Both begin every minute with a tone: 1000 Hz for 0.8 s from
//! WWV, 1200 Hz for 0.8 s from WWVH. CHU uses its own carriers
//! and a 1000 Hz, 0.5 s tone. Once the station is known, the
//! tone's arrival time, less the station's emission time, is
//! the propagation delay. Each propagation mode (ground wave,
//! one or more reflections from the E or F2 layers) predicts a
//! different delay, so the measured delay picks the mode.
//!
//! Timing comes from the sample stream, not the host clock.
//! The host clock only names the minutes.

#![allow(dead_code)]

mod archive;
mod builder;
mod clock;
mod discriminator;
mod engine;
mod filter;
mod ingest;
mod pipeline;
mod resample;
mod station;
mod voter;

pub use archive::ArchiveRecord;
pub use builder::{BuildError, ChannelPipelineBuilder, DiscriminatorBuilder, ResamplerBuilder};
pub use clock::{MinuteKey, SampleClock, TimestampUnwrapper, TIMESTAMP_EPOCH};
pub use discriminator::{
    ChannelCharacterization, ConfidenceTier, Discrimination, Discriminator,
    NoDiscriminationReason, StationDetection, StationDiscriminator, TimecodeDiscrimination,
    TimecodeFailure, TimecodeParams, TimecodeResult, TonePower,
};
pub use engine::{
    Candidate, Evidence, EvidenceKind, HistoricalPredictor, Layer, ModeSearch, Prediction,
    PropagationMode, SelectionPolicy, SolutionStatus, Solver, SolverInput, StationPredictor,
    TemporalEngine, TransmissionSolution, UncertaintyModel,
};
pub use ingest::{
    encode_packet, GapEvent, IngestStats, IqOrder, MinuteWindow, MulticastSource, Packet,
    PacketError, SourceError, StreamIngest,
};
pub use pipeline::{ChannelPipeline, MinuteReport};
pub use resample::{DecimationStage, Resampler, TRANSITION_RANGE};
pub use station::{ChannelError, ChannelInfo, SiteLocation, Station};
pub use voter::{AnchorQuality, GlobalVoter, StationAnchor, VoterError};
