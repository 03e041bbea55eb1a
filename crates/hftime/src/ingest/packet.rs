//! RTP-style sample packets
//!
//! ```txt
//!  byte 0     : V V P X C C C C   (version, padding, extension, CSRC count)
//!  byte 1     : marker / payload type (ignored)
//!  bytes 2-3  : sequence number (big-endian)
//!  bytes 4-7  : sample-clock timestamp, one tick per sample pair
//!  bytes 8-11 : source identifier
//!  CSRC list  : 4 bytes × CSRC count
//!  extension  : 2 bytes profile, 2 bytes length (in 32-bit words), data
//!  payload    : big-endian i16 pairs
//! ```

use byteorder::{BigEndian, ByteOrder};
use num_complex::Complex;
use thiserror::Error;

/// Size of the fixed header, in bytes
pub const FIXED_HEADER_LEN: usize = 12;

/// Size of one sample pair, in bytes
pub const SAMPLE_PAIR_LEN: usize = 4;

/// Protocol version carried in the two high bits of byte 0
pub const RTP_VERSION: u8 = 2;

const I16_SCALE: f32 = 1.0 / 32768.0;

/// Order of the two integers in each sample pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IqOrder {
    /// Quadrature first, then in-phase
    #[default]
    QI,

    /// In-phase first, then quadrature
    IQ,
}

/// A validated packet, borrowing its payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Sequence number
    pub sequence: u16,

    /// Sample-clock timestamp of the first sample pair
    pub timestamp: u32,

    /// Source identifier
    pub source_id: u32,

    payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Parse and validate a datagram
    ///
    /// Checks the header and payload framing. The source
    /// identifier is *not* checked here; see
    /// [`parse_from`](#method.parse_from).
    pub fn parse(buf: &'a [u8]) -> Result<Self, PacketError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }

        let version = buf[0] >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::BadVersion(version));
        }
        let padding = buf[0] & 0x20 != 0;
        let extension = buf[0] & 0x10 != 0;
        let csrc_count = (buf[0] & 0x0f) as usize;

        let sequence = BigEndian::read_u16(&buf[2..4]);
        let timestamp = BigEndian::read_u32(&buf[4..8]);
        let source_id = BigEndian::read_u32(&buf[8..12]);

        let mut start = FIXED_HEADER_LEN + 4 * csrc_count;
        if start > buf.len() {
            return Err(PacketError::Truncated);
        }
        if extension {
            if start + 4 > buf.len() {
                return Err(PacketError::Truncated);
            }
            let words = BigEndian::read_u16(&buf[start + 2..start + 4]) as usize;
            start += 4 + 4 * words;
            if start > buf.len() {
                return Err(PacketError::Truncated);
            }
        }

        let mut end = buf.len();
        if padding {
            let pad = buf[end - 1] as usize;
            if pad == 0 || pad > end - start {
                return Err(PacketError::BadPadding(pad));
            }
            end -= pad;
        }

        let payload = &buf[start..end];
        if payload.len() % SAMPLE_PAIR_LEN != 0 {
            return Err(PacketError::RaggedPayload(payload.len()));
        }

        Ok(Packet {
            sequence,
            timestamp,
            source_id,
            payload,
        })
    }

    /// Parse and require a specific source identifier
    pub fn parse_from(buf: &'a [u8], source_id: u32) -> Result<Self, PacketError> {
        let pkt = Self::parse(buf)?;
        if pkt.source_id != source_id {
            return Err(PacketError::WrongSource {
                expected: source_id,
                actual: pkt.source_id,
            });
        }
        Ok(pkt)
    }

    /// Number of sample pairs in the payload
    pub fn sample_count(&self) -> usize {
        self.payload.len() / SAMPLE_PAIR_LEN
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Decode payload samples, normalized to ±1.0
    pub fn samples(&self, order: IqOrder) -> impl Iterator<Item = Complex<f32>> + 'a {
        self.payload.chunks_exact(SAMPLE_PAIR_LEN).map(move |pair| {
            let first = BigEndian::read_i16(&pair[0..2]) as f32 * I16_SCALE;
            let second = BigEndian::read_i16(&pair[2..4]) as f32 * I16_SCALE;
            match order {
                IqOrder::QI => Complex::new(second, first),
                IqOrder::IQ => Complex::new(first, second),
            }
        })
    }
}

/// Packet rejected
///
/// Rejected packets are dropped without changing any
/// receiver state.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PacketError {
    /// Shorter than the fixed header
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    /// Unsupported protocol version
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),

    /// CSRC list or extension runs past the end of the packet
    #[error("header extends past end of packet")]
    Truncated,

    /// Padding length is invalid
    #[error("invalid padding length {0}")]
    BadPadding(usize),

    /// Payload is not a whole number of sample pairs
    #[error("payload of {0} bytes is not a multiple of the sample pair size")]
    RaggedPayload(usize),

    /// Packet belongs to another stream
    #[error("source id {actual:#010x} does not match expected {expected:#010x}")]
    WrongSource {
        /// Configured source
        expected: u32,
        /// Received source
        actual: u32,
    },
}

/// Build a packet (for tests and loopback tools)
///
/// Samples are scaled by 32768 and clamped to `i16`.
pub fn encode_packet(
    sequence: u16,
    timestamp: u32,
    source_id: u32,
    samples: &[Complex<f32>],
    order: IqOrder,
) -> Vec<u8> {
    let mut out = vec![0u8; FIXED_HEADER_LEN + SAMPLE_PAIR_LEN * samples.len()];
    out[0] = RTP_VERSION << 6;
    out[1] = 97;
    BigEndian::write_u16(&mut out[2..4], sequence);
    BigEndian::write_u32(&mut out[4..8], timestamp);
    BigEndian::write_u32(&mut out[8..12], source_id);
    for (sa, pair) in samples
        .iter()
        .zip(out[FIXED_HEADER_LEN..].chunks_exact_mut(SAMPLE_PAIR_LEN))
    {
        let (first, second) = match order {
            IqOrder::QI => (sa.im, sa.re),
            IqOrder::IQ => (sa.re, sa.im),
        };
        BigEndian::write_i16(&mut pair[0..2], to_i16(first));
        BigEndian::write_i16(&mut pair[2..4], to_i16(second));
    }
    out
}

fn to_i16(v: f32) -> i16 {
    (v * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_parse_basic() {
        let samples = [Complex::new(0.5f32, -0.25f32), Complex::new(-1.0, 0.0)];
        let buf = encode_packet(7, 123456, 0xdeadbeef, &samples, IqOrder::QI);

        let pkt = Packet::parse_from(&buf, 0xdeadbeef).unwrap();
        assert_eq!(7, pkt.sequence);
        assert_eq!(123456, pkt.timestamp);
        assert_eq!(2, pkt.sample_count());

        // wire order is (second, first) = (Q, I)
        assert_eq!(&[0xe0, 0x00, 0x40, 0x00], &pkt.payload()[0..4]);

        let out: Vec<_> = pkt.samples(IqOrder::QI).collect();
        assert_approx_eq!(0.5, out[0].re);
        assert_approx_eq!(-0.25, out[0].im);
        assert_approx_eq!(-1.0, out[1].re);

        // other convention swaps components
        let swapped: Vec<_> = pkt.samples(IqOrder::IQ).collect();
        assert_approx_eq!(-0.25, swapped[0].re);
        assert_approx_eq!(0.5, swapped[0].im);
    }

    #[test]
    fn test_reject() {
        let samples = [Complex::new(0.1f32, 0.1f32); 4];
        let buf = encode_packet(0, 0, 42, &samples, IqOrder::QI);

        assert_eq!(Err(PacketError::TooShort(11)), Packet::parse(&buf[..11]));
        assert_eq!(
            Err(PacketError::RaggedPayload(14)),
            Packet::parse(&buf[..FIXED_HEADER_LEN + 14])
        );
        assert!(matches!(
            Packet::parse_from(&buf, 43),
            Err(PacketError::WrongSource {
                expected: 43,
                actual: 42
            })
        ));

        let mut bad = buf.clone();
        bad[0] = 1 << 6;
        assert_eq!(Err(PacketError::BadVersion(1)), Packet::parse(&bad));

        // CSRC count with no room for the list
        let mut bad = buf[..FIXED_HEADER_LEN].to_vec();
        bad[0] |= 0x02;
        assert_eq!(Err(PacketError::Truncated), Packet::parse(&bad));
    }

    #[test]
    fn test_extension_and_padding() {
        let samples = [Complex::new(0.25f32, 0.0f32); 2];
        let plain = encode_packet(1, 2, 3, &samples, IqOrder::QI);

        // insert a one-word extension and two bytes of padding
        let mut buf = plain[..FIXED_HEADER_LEN].to_vec();
        buf[0] |= 0x10 | 0x20;
        buf.extend_from_slice(&[0xbe, 0xde, 0x00, 0x01, 1, 2, 3, 4]);
        buf.extend_from_slice(&plain[FIXED_HEADER_LEN..]);
        buf.extend_from_slice(&[0x00, 0x02]);

        let pkt = Packet::parse(&buf).unwrap();
        assert_eq!(2, pkt.sample_count());
        assert_eq!(&plain[FIXED_HEADER_LEN..], pkt.payload());

        // extension length runs off the end
        let mut bad = buf.clone();
        bad[FIXED_HEADER_LEN + 3] = 0xff;
        assert_eq!(Err(PacketError::Truncated), Packet::parse(&bad));
    }
}
