//! Stream ingestion
//!
//! [`StreamIngest`] consumes raw datagrams for one channel and
//! produces [`MinuteWindow`]s. It validates each packet, tracks
//! continuity with the packet's sample-clock timestamp, fills
//! lost samples with zeros, and feeds a [`MinuteAssembler`].
//!
//! Continuity is judged by timestamp alone: the timestamp of
//! each packet should equal the previous one plus the number of
//! sample pairs it carried.
//!
//! | timestamp vs expected | action                                |
//! |-----------------------|---------------------------------------|
//! | equal                 | append                                |
//! | ahead ≤ max fill      | zero-fill the difference, then append |
//! | behind ≤ max fill     | late or duplicate; drop               |
//! | off by > max fill     | stream restart; close and resync      |
//!
//! A jump in sequence number with a contiguous timestamp is
//! counted, but the samples are kept.
//!
//! Timestamps in [`MinuteWindow`] and [`GapEvent`] are on the
//! extended timeline of [`TimestampUnwrapper`]: the stream's
//! first timestamp plus 2³². The low 32 bits are the RTP
//! timestamp.

mod minute;
mod packet;
mod source;

pub use minute::{GapEvent, MinuteAssembler, MinuteWindow};
pub use packet::{encode_packet, IqOrder, Packet, PacketError};
pub use source::{MulticastSource, SourceError};

#[cfg(not(test))]
use log::{debug, trace, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as trace;
#[cfg(test)]
use std::println as warn;

use chrono::{DateTime, Utc};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::builder::BuildError;
use crate::clock::{SampleClock, TimestampUnwrapper};
use crate::resample::Resampler;

/// Default largest gap which is zero-filled, in seconds
pub const DEFAULT_MAX_FILL_SECS: u32 = 120;

/// Ingest counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Packets accepted
    pub accepted: u64,

    /// Packets rejected for malformed headers or payloads
    pub rejected_malformed: u64,

    /// Packets rejected for belonging to another source
    pub rejected_source: u64,

    /// Late or duplicate packets dropped
    pub late: u64,

    /// Sequence discontinuities with a contiguous timestamp
    pub sequence_anomalies: u64,

    /// Samples replaced by zero fill
    pub lost_samples: u64,

    /// Stream restarts
    pub resyncs: u64,
}

impl IngestStats {
    fn reject(&mut self, err: &PacketError) {
        match err {
            PacketError::WrongSource { .. } => self.rejected_source += 1,
            _ => self.rejected_malformed += 1,
        }
    }
}

/// Packet-to-minute ingestion for one channel
///
/// ```
/// use hftime::{ResamplerBuilder, StreamIngest};
///
/// let mut ingest = StreamIngest::new(16000, ResamplerBuilder::default().build())
///     .expect("16 kHz divides into 10 Hz");
/// ingest.with_source_id(Some(0x1234));
/// assert_eq!(16000, ingest.sample_rate());
/// ```
#[derive(Clone, Debug)]
pub struct StreamIngest {
    sample_rate: u32,
    source_id: Option<u32>,
    order: IqOrder,
    max_fill: u64,
    resampler: Resampler,
    unwrapper: TimestampUnwrapper,
    assembler: Option<MinuteAssembler>,
    last_sequence: Option<u16>,
    stats: IngestStats,
    scratch: Vec<Complex<f32>>,
}

impl StreamIngest {
    /// New ingest at `sample_rate`, decimating with `resampler`
    ///
    /// Fails unless one minute of samples is a whole multiple
    /// of the resampler's total ratio.
    pub fn new(sample_rate: u32, resampler: Resampler) -> Result<Self, BuildError> {
        if sample_rate == 0 {
            return Err(BuildError::ZeroSampleRate);
        }
        let samples_per_minute = sample_rate as u64 * 60;
        let ratio = resampler.ratio();
        if ratio == 0 || samples_per_minute % ratio != 0 {
            return Err(BuildError::RatioMismatch {
                samples_per_minute,
                ratio,
            });
        }
        Ok(Self {
            sample_rate,
            source_id: None,
            order: IqOrder::default(),
            max_fill: DEFAULT_MAX_FILL_SECS as u64 * sample_rate as u64,
            resampler,
            unwrapper: TimestampUnwrapper::new(),
            assembler: None,
            last_sequence: None,
            stats: IngestStats::default(),
            scratch: Vec::new(),
        })
    }

    /// Accept only packets from `source_id`
    ///
    /// If `None`, the first valid packet's source is adopted.
    pub fn with_source_id(&mut self, source_id: Option<u32>) -> &mut Self {
        self.source_id = source_id;
        self
    }

    /// Component order of sample pairs
    pub fn with_iq_order(&mut self, order: IqOrder) -> &mut Self {
        self.order = order;
        self
    }

    /// Largest gap which is zero-filled (seconds)
    ///
    /// Larger discontinuities restart the stream.
    pub fn with_max_fill_secs(&mut self, secs: u32) -> &mut Self {
        self.max_fill = secs.max(1) as u64 * self.sample_rate as u64;
        self
    }

    /// Native sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Accepted source identifier, if known
    pub fn source_id(&self) -> Option<u32> {
        self.source_id
    }

    /// Decimation ratio
    pub fn decimation(&self) -> u64 {
        self.resampler.ratio()
    }

    /// Counters
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Sample clock, once anchored by the first packet
    pub fn clock(&self) -> Option<&SampleClock> {
        self.assembler.as_ref().map(|asm| asm.clock())
    }

    /// Ingest one datagram
    ///
    /// `now` is the UTC time of reception. It is used only to
    /// anchor the sample clock at the first packet, and again
    /// after a stream restart. Callers with a better time source
    /// may supply its reading instead.
    ///
    /// Returns the minute windows which this packet completes.
    /// Rejected packets return nothing and change no state
    /// other than the counters.
    pub fn push_packet(&mut self, buf: &[u8], now: DateTime<Utc>) -> Vec<MinuteWindow> {
        let parsed = match self.source_id {
            Some(id) => Packet::parse_from(buf, id),
            None => Packet::parse(buf),
        };
        let pkt = match parsed {
            Ok(pkt) => pkt,
            Err(e) => {
                trace!("dropped packet: {}", e);
                self.stats.reject(&e);
                return Vec::new();
            }
        };

        let count = pkt.sample_count() as u64;
        let ts = self.unwrapper.extend(pkt.timestamp);
        let mut out = Vec::new();

        let expected = self.assembler.as_ref().map(|asm| asm.next_timestamp());
        match expected {
            None => {
                debug!(
                    "stream start: source {:#010x}, timestamp {}",
                    pkt.source_id, pkt.timestamp
                );
                self.restart(ts, now);
            }
            Some(exp) if ts == exp => {
                if let Some(last) = self.last_sequence {
                    if pkt.sequence != last.wrapping_add(1) {
                        trace!("sequence jump {} → {}", last, pkt.sequence);
                        self.stats.sequence_anomalies += 1;
                    }
                }
            }
            Some(exp) if ts < exp && exp - ts <= self.max_fill => {
                trace!("late packet: timestamp {} behind by {}", ts, exp - ts);
                self.stats.late += 1;
                return out;
            }
            Some(exp) if ts > exp && ts - exp <= self.max_fill => {
                let missing = ts - exp;
                debug!("lost {} samples at timestamp {}", missing, exp);
                self.stats.lost_samples += missing;
                if let Some(asm) = self.assembler.as_mut() {
                    out.extend(asm.push(&vec![Complex::new(0.0, 0.0); missing as usize], true));
                }
            }
            Some(exp) => {
                warn!(
                    "stream restart: timestamp {} where {} was expected; resynchronizing",
                    ts, exp
                );
                if let Some(asm) = self.assembler.as_mut() {
                    out.extend(asm.finish());
                }
                self.stats.resyncs += 1;
                self.restart(ts, now);
            }
        }

        self.unwrapper.unwrap(pkt.timestamp);
        self.source_id.get_or_insert(pkt.source_id);
        self.last_sequence = Some(pkt.sequence);
        self.stats.accepted += 1;

        self.scratch.clear();
        self.scratch.extend(pkt.samples(self.order));
        if let Some(asm) = self.assembler.as_mut() {
            out.extend(asm.push(&self.scratch, false));
        }
        debug_assert_eq!(
            Some(ts + count),
            self.assembler.as_ref().map(|asm| asm.next_timestamp())
        );

        for win in &out {
            debug!(
                "minute {} complete: {:.1}% received, {} gaps; {:?}",
                win.key(),
                100.0 * win.completeness(),
                win.gaps().len(),
                self.stats
            );
        }
        out
    }

    /// Close the stream, releasing any partial minute
    ///
    /// The partial minute is completed with zero fill. The next
    /// packet starts a new stream.
    pub fn finish(&mut self) -> Vec<MinuteWindow> {
        let out = match self.assembler.take() {
            Some(mut asm) => asm.finish(),
            None => Vec::new(),
        };
        self.unwrapper.reset();
        self.last_sequence = None;
        out
    }

    fn restart(&mut self, ts: u64, now: DateTime<Utc>) {
        let clock = SampleClock::new(self.sample_rate, ts, now);
        let mut resampler = self.resampler.clone();
        resampler.reset();
        self.assembler = Some(MinuteAssembler::new(clock, resampler, ts));
        self.last_sequence = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use chrono::TimeZone;

    use crate::clock::TIMESTAMP_EPOCH;

    const RATE: u32 = 160;
    const PER_PACKET: usize = 16;
    const SSRC: u32 = 0xfeed;

    fn ingest() -> StreamIngest {
        let mut ing = StreamIngest::new(RATE, Resampler::new(&[4, 4], 0.2)).unwrap();
        ing.with_source_id(Some(SSRC)).with_max_fill_secs(10);
        ing
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 30).unwrap()
    }

    // packet number `n` of a stream starting at timestamp 1000
    fn packet(n: u32) -> Vec<u8> {
        let ts = 1000u32.wrapping_add(n * PER_PACKET as u32);
        encode_packet(
            n as u16,
            ts,
            SSRC,
            &[Complex::new(0.25f32, -0.125f32); PER_PACKET],
            IqOrder::QI,
        )
    }

    // 155 seconds of packets, with some skipped
    fn run(ing: &mut StreamIngest, skip: &[u32]) -> Vec<MinuteWindow> {
        let mut out = Vec::new();
        let total = 155 * RATE / PER_PACKET as u32;
        for n in 0..total {
            if skip.contains(&n) {
                continue;
            }
            out.extend(ing.push_packet(&packet(n), start_time()));
        }
        out
    }

    #[test]
    fn test_ratio_check() {
        assert!(StreamIngest::new(RATE, Resampler::new(&[4, 4], 0.2)).is_ok());
        assert!(matches!(
            StreamIngest::new(RATE, Resampler::new(&[7], 0.2)),
            Err(BuildError::RatioMismatch {
                samples_per_minute: 9600,
                ratio: 7
            })
        ));
        assert!(matches!(
            StreamIngest::new(0, Resampler::new(&[4], 0.2)),
            Err(BuildError::ZeroSampleRate)
        ));
    }

    #[test]
    fn test_contiguous() {
        let mut ing = ingest();
        let out = run(&mut ing, &[]);
        assert_eq!(2, out.len());
        assert_eq!(
            TIMESTAMP_EPOCH + 1000 + 30 * RATE as u64,
            out[0].start_timestamp()
        );
        assert_eq!(1000 + 30 * RATE, out[0].rtp_timestamp());
        assert_eq!(1, out[0].key().minute_of_hour());
        assert_eq!(2, out[1].key().minute_of_hour());
        for win in &out {
            assert_eq!(9600, win.samples().len());
            assert_eq!(600, win.decimated().len());
            assert!(win.gaps().is_empty());
            assert_approx_eq!(1.0, win.completeness());
        }
        assert_approx_eq!(0.25f32, out[0].samples()[0].re);
        assert_approx_eq!(-0.125f32, out[0].samples()[0].im);
        assert_eq!(1550, ing.stats().accepted);
        assert_eq!(0, ing.stats().lost_samples);
    }

    #[test]
    fn test_gap_fill_preserves_timing() {
        // packets 400..=402 fall within minute 1
        let mut ing = ingest();
        let out = run(&mut ing, &[400, 401, 402]);
        let clean = run(&mut ingest(), &[]);
        assert_eq!(2, out.len());

        let win = &out[0];
        assert_eq!(9600, win.samples().len());
        assert_eq!(
            &[GapEvent {
                start_timestamp: TIMESTAMP_EPOCH + 1000 + 400 * PER_PACKET as u64,
                samples: 48
            }],
            win.gaps()
        );
        assert_approx_eq!(1.0 - 48.0 / 9600.0, win.completeness());
        assert_eq!(48, ing.stats().lost_samples);

        // the following minute is unaffected
        assert_eq!(clean[1].start_timestamp(), out[1].start_timestamp());
        assert_eq!(clean[1].samples(), out[1].samples());

        // filled samples are zero
        let idx = (400 * PER_PACKET as u64 - 30 * RATE as u64) as usize;
        assert_eq!(Complex::new(0.0f32, 0.0f32), win.samples()[idx]);
        assert_ne!(Complex::new(0.0f32, 0.0f32), win.samples()[idx - 1]);
    }

    #[test]
    fn test_rejected_and_late_change_nothing() {
        let clean = run(&mut ingest(), &[]);

        let mut ing = ingest();
        let mut out = Vec::new();
        let total = 155 * RATE / PER_PACKET as u32;
        for n in 0..total {
            out.extend(ing.push_packet(&packet(n), start_time()));
            if n == 500 {
                // garbage, wrong source, and a duplicate
                assert!(ing.push_packet(&[0x80, 0x00, 0x01], start_time()).is_empty());
                let mut other = packet(n + 1);
                other[11] ^= 0xff;
                assert!(ing.push_packet(&other, start_time()).is_empty());
                assert!(ing.push_packet(&packet(n - 2), start_time()).is_empty());
            }
        }

        assert_eq!(clean, out);
        let stats = ing.stats();
        assert_eq!(1, stats.rejected_malformed);
        assert_eq!(1, stats.rejected_source);
        assert_eq!(1, stats.late);
        assert_eq!(0, stats.lost_samples);
    }

    #[test]
    fn test_sequence_anomaly() {
        let mut ing = ingest();
        ing.push_packet(&packet(0), start_time());
        let mut pkt = packet(1);
        pkt[3] = 99;
        ing.push_packet(&pkt, start_time());
        assert_eq!(1, ing.stats().sequence_anomalies);
        assert_eq!(0, ing.stats().lost_samples);
    }

    #[test]
    fn test_restart() {
        let mut ing = ingest();
        let mut out = Vec::new();
        // 40 seconds: 30 s before the boundary, 10 s into minute 1
        for n in 0..400 {
            out.extend(ing.push_packet(&packet(n), start_time()));
        }
        assert!(out.is_empty());

        // 20 seconds of silence exceeds the fill limit
        let later = start_time() + chrono::Duration::seconds(60);
        let out = ing.push_packet(&packet(600), later);
        assert_eq!(1, out.len());
        assert_eq!(1, ing.stats().resyncs);
        assert_approx_eq!(10.0 / 60.0, out[0].completeness());
        assert_eq!(9600, out[0].samples().len());
        assert_eq!(600, out[0].decimated().len());

        // the clock is re-anchored at the new packet
        let clock = ing.clock().unwrap();
        assert_eq!(
            later,
            clock.utc(TIMESTAMP_EPOCH + 1000 + 600 * PER_PACKET as u64)
        );
    }

    #[test]
    fn test_timestamp_wrap() {
        let mut ing = StreamIngest::new(RATE, Resampler::new(&[4, 4], 0.2)).unwrap();
        let start = u32::MAX - 8;
        for n in 0..3u32 {
            let ts = start.wrapping_add(n * PER_PACKET as u32);
            let pkt = encode_packet(
                n as u16,
                ts,
                7,
                &[Complex::new(0.1f32, 0.0f32); PER_PACKET],
                IqOrder::QI,
            );
            ing.push_packet(&pkt, start_time());
        }
        assert_eq!(3, ing.stats().accepted);
        assert_eq!(0, ing.stats().lost_samples);
        assert_eq!(0, ing.stats().resyncs);
        assert_eq!(Some(7), ing.source_id());
    }
}
