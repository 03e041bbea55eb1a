//! Matched-filter tone detection
//!
//! A [`ToneDetector`] correlates a real signal, usually an
//! AC-coupled amplitude envelope, against a tapered quadrature
//! template
//!
//! ```txt
//! t[n] = g · w[n] · exp(-j·2π·f·n / fs),   n = 0 .. L-1
//! ```
//!
//! where `w` is a Tukey window and `g = 2√L / Σw`. For an input
//! `A·cos(2π·f·n/fs + φ)` aligned with the template, the
//! correlation magnitude is `A·√L` whatever the phase `φ`.

use std::f64::consts::PI;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::filter::tukey;

/// Smallest magnitude used when converting to decibels
const MAGNITUDE_FLOOR: f32 = 1.0e-12;

/// Result of a tone search
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToneMeasurement {
    /// Tone frequency (Hz)
    pub frequency_hz: f32,

    /// Template offset of the correlation peak (samples)
    pub offset: usize,

    /// Correlation magnitude at the peak
    pub peak: f32,

    /// Estimated tone amplitude, `peak / √L`
    pub amplitude: f32,

    /// Tone amplitude (dB)
    pub power_db: f32,

    /// Peak over the RMS of the guard-frequency correlations (dB)
    pub snr_db: f32,
}

/// Leading edge of a tone burst, in samples
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadingEdge {
    /// Sub-sample index of the tone's onset
    pub onset: f64,

    /// 10% to 90% rise time of the narrowband envelope
    pub rise: f64,
}

/// Quadrature matched filter for one tone frequency
#[derive(Clone, Debug)]
pub struct ToneDetector {
    frequency_hz: f32,
    sample_rate: u32,
    template: Vec<Complex<f32>>,
    guards: Vec<Vec<Complex<f32>>>,
    taper_alpha: f64,
}

impl ToneDetector {
    /// Detector for `frequency_hz` with a template of `len` samples
    ///
    /// `taper_alpha` is the fraction of the template occupied by
    /// the cosine tapers.
    pub fn new(frequency_hz: f32, sample_rate: u32, len: usize, taper_alpha: f64) -> Self {
        Self {
            frequency_hz,
            sample_rate,
            template: quadrature_template(frequency_hz, sample_rate, len, taper_alpha),
            guards: Vec::new(),
            taper_alpha,
        }
    }

    /// Measure noise at these frequencies
    ///
    /// Guard templates share the main template's length and
    /// taper.
    pub fn with_guards(mut self, guard_hz: &[f32]) -> Self {
        self.guards = guard_hz
            .iter()
            .map(|f| quadrature_template(*f, self.sample_rate, self.len(), self.taper_alpha))
            .collect();
        self
    }

    /// Tone frequency (Hz)
    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    /// Template length, `L`
    pub fn len(&self) -> usize {
        self.template.len()
    }

    /// True if the template is empty
    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// Correlation magnitude with the template starting at `offset`
    ///
    /// Signal beyond the end of `signal` is taken as zero.
    pub fn correlate(&self, signal: &[f32], offset: usize) -> f32 {
        correlate(&self.template, signal, offset)
    }

    /// Find the correlation peak at offsets `0 ..= max_offset`
    ///
    /// Offsets are searched coarsely, every `step` samples, and
    /// then refined sample-by-sample around the best one.
    pub fn measure(&self, signal: &[f32], max_offset: usize, step: usize) -> ToneMeasurement {
        let step = step.max(1);
        let mut best = (0usize, f32::MIN);
        for offset in (0..=max_offset).step_by(step) {
            let c = self.correlate(signal, offset);
            if c > best.1 {
                best = (offset, c);
            }
        }
        let lo = best.0.saturating_sub(step);
        let hi = (best.0 + step).min(max_offset);
        for offset in lo..=hi {
            let c = self.correlate(signal, offset);
            if c > best.1 {
                best = (offset, c);
            }
        }

        let (offset, peak) = best;
        let noise = self.noise(signal, offset);
        let amplitude = peak / (self.len().max(1) as f32).sqrt();
        ToneMeasurement {
            frequency_hz: self.frequency_hz,
            offset,
            peak,
            amplitude,
            power_db: to_db(amplitude),
            snr_db: to_db(peak) - to_db(noise),
        }
    }

    /// RMS of the guard-frequency correlations at `offset`
    pub fn noise(&self, signal: &[f32], offset: usize) -> f32 {
        if self.guards.is_empty() {
            return MAGNITUDE_FLOOR;
        }
        let sum: f32 = self
            .guards
            .iter()
            .map(|g| correlate(g, signal, offset).powi(2))
            .sum();
        (sum / self.guards.len() as f32).sqrt()
    }

    /// Locate the leading edge of a detected tone
    ///
    /// Computes the tone's narrowband envelope over a sliding
    /// window of `edge_len` samples, between `reach` samples
    /// before and after the correlation peak. The onset is the
    /// first upward crossing of half the measured amplitude,
    /// corrected by half the window length.
    ///
    /// Returns `None` if the envelope never crosses half the
    /// amplitude within that span.
    pub fn leading_edge(
        &self,
        signal: &[f32],
        tone: &ToneMeasurement,
        edge_len: usize,
        reach: usize,
    ) -> Option<LeadingEdge> {
        let edge_len = edge_len.max(1);
        let start = tone.offset.saturating_sub(reach);
        let end = (tone.offset + reach + edge_len).min(signal.len());
        if end <= start + edge_len || tone.amplitude <= 0.0 {
            return None;
        }

        let env = narrowband_envelope(
            &signal[start..end],
            self.frequency_hz,
            self.sample_rate,
            edge_len,
        );
        let reference = tone.amplitude as f64;
        let n10 = first_crossing(&env, 0.1 * reference)?;
        let n50 = first_crossing(&env, 0.5 * reference)?;
        let n90 = first_crossing(&env, 0.9 * reference).unwrap_or(n50);

        Some(LeadingEdge {
            onset: start as f64 + n50 + edge_len as f64 / 2.0,
            rise: (n90 - n10).max(0.0),
        })
    }

    /// Subtract a detected tone burst from `signal`
    ///
    /// The burst runs for `len` samples from `onset`. Its
    /// amplitude and phase are fitted over the burst less `guard`
    /// samples at either end, where it may still be rising or
    /// falling.
    pub fn cancel(&self, signal: &mut [f32], onset: f64, len: usize, guard: usize) {
        let start = onset.round().max(0.0) as usize;
        let end = start.saturating_add(len).min(signal.len());
        let (fit_lo, fit_hi) = (start + guard, end.saturating_sub(guard));
        if fit_hi <= fit_lo {
            return;
        }

        let omega = 2.0 * PI * self.frequency_hz as f64 / self.sample_rate as f64;
        let z = signal[fit_lo..fit_hi]
            .iter()
            .enumerate()
            .fold(Complex::new(0.0f64, 0.0f64), |acc, (k, s)| {
                acc + Complex::from_polar(*s as f64, -omega * (fit_lo + k) as f64)
            })
            * (2.0 / (fit_hi - fit_lo) as f64);

        for (k, sa) in signal[start..end].iter_mut().enumerate() {
            let model = (z * Complex::from_polar(1.0, omega * (start + k) as f64)).re;
            *sa -= model as f32;
        }
    }
}

/// Tapered quadrature template with `A·√L` peak normalization
pub fn quadrature_template(
    frequency_hz: f32,
    sample_rate: u32,
    len: usize,
    taper_alpha: f64,
) -> Vec<Complex<f32>> {
    if len == 0 {
        return Vec::new();
    }
    let w = tukey(len, taper_alpha);
    let wsum: f64 = w.iter().sum();
    let gain = 2.0 * (len as f64).sqrt() / wsum;
    let omega = 2.0 * PI * frequency_hz as f64 / sample_rate as f64;
    w.iter()
        .enumerate()
        .map(|(n, wn)| {
            let c = Complex::from_polar(gain * wn, -omega * n as f64);
            Complex::new(c.re as f32, c.im as f32)
        })
        .collect()
}

/// Convert a magnitude to decibels
pub fn to_db(magnitude: f32) -> f32 {
    20.0 * magnitude.max(MAGNITUDE_FLOOR).log10()
}

// |Σ signal[offset + n] · template[n]|
fn correlate(template: &[Complex<f32>], signal: &[f32], offset: usize) -> f32 {
    if offset >= signal.len() {
        return 0.0;
    }
    let acc = signal[offset..]
        .iter()
        .zip(template.iter())
        .fold(Complex::new(0.0f64, 0.0f64), |acc, (s, t)| {
            acc + Complex::new((t.re * s) as f64, (t.im * s) as f64)
        });
    acc.norm() as f32
}

// Amplitude of the tone at `frequency_hz` over a sliding window
// of `len` samples. Output `i` covers input `i .. i + len`.
fn narrowband_envelope(signal: &[f32], frequency_hz: f32, sample_rate: u32, len: usize) -> Vec<f64> {
    let omega = 2.0 * PI * frequency_hz as f64 / sample_rate as f64;
    let mut prefix = Vec::with_capacity(signal.len() + 1);
    let mut acc = Complex::new(0.0f64, 0.0f64);
    prefix.push(acc);
    for (n, s) in signal.iter().enumerate() {
        acc += Complex::from_polar(*s as f64, -omega * n as f64);
        prefix.push(acc);
    }
    let scale = 2.0 / len as f64;
    (0..=signal.len().saturating_sub(len))
        .map(|i| (prefix[i + len] - prefix[i]).norm() * scale)
        .collect()
}

// First upward crossing of `level`, linearly interpolated
fn first_crossing(env: &[f64], level: f64) -> Option<f64> {
    let idx = env.iter().position(|v| *v >= level)?;
    if idx == 0 {
        return Some(0.0);
    }
    let (a, b) = (env[idx - 1], env[idx]);
    Some((idx - 1) as f64 + (level - a) / (b - a))
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    fn tone(freq: f32, rate: u32, amplitude: f32, phase: f32, onset: usize, len: usize, total: usize) -> Vec<f32> {
        (0..total)
            .map(|n| {
                if n >= onset && n < onset + len {
                    amplitude
                        * (2.0 * std::f32::consts::PI * freq * n as f32 / rate as f32 + phase).cos()
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn test_peak_law() {
        // 0.8 s template at 3 kHz
        const RATE: u32 = 3000;
        let det = ToneDetector::new(1000.0, RATE, 2400, 0.2);
        assert_eq!(2400, det.len());
        let expect_unit = (2400.0f32).sqrt();

        for amplitude in [1.0f32, 0.1, 0.01] {
            for phase in [0.0f32, 0.7, 2.0] {
                let sig = tone(1000.0, RATE, amplitude, phase, 0, 2400, 2400);
                let peak = det.correlate(&sig, 0);
                assert_approx_eq!(amplitude * expect_unit, peak, 0.005 * amplitude * expect_unit);
            }
        }
    }

    #[test]
    fn test_measure_and_edge() {
        const RATE: u32 = 16000;
        let onset = 200; // 12.5 ms
        let sig = tone(1000.0, RATE, 0.3, 0.4, onset, 12800, 16000);
        let det = ToneDetector::new(1000.0, RATE, 12800, 0.2)
            .with_guards(&[850.0, 1100.0, 1350.0, 1500.0]);

        let m = det.measure(&sig, 1600, 16);
        assert!((m.offset as i64 - onset as i64).abs() <= 16, "offset {}", m.offset);
        assert_approx_eq!(0.3f32, m.amplitude, 0.01);
        assert_approx_eq!(to_db(0.3), m.power_db, 0.3);
        assert!(m.snr_db > 40.0, "snr {}", m.snr_db);

        let edge = det.leading_edge(&sig, &m, 80, 640).unwrap();
        assert_approx_eq!(onset as f64, edge.onset, 1.0);
        // ideal rise is 80% of the window
        assert_approx_eq!(64.0, edge.rise, 2.0);
    }

    #[test]
    fn test_other_tone_rejected() {
        const RATE: u32 = 16000;
        let sig = tone(1200.0, RATE, 0.5, 0.0, 100, 12800, 16000);
        let wwv = ToneDetector::new(1000.0, RATE, 12800, 0.2);
        let wwvh = ToneDetector::new(1200.0, RATE, 12800, 0.2);
        let m0 = wwv.measure(&sig, 1600, 16);
        let m1 = wwvh.measure(&sig, 1600, 16);
        assert!(m1.power_db - m0.power_db > 40.0);
    }

    #[test]
    fn test_cancel() {
        const RATE: u32 = 8000;
        let strong = tone(1000.0, RATE, 0.4, 1.1, 80, 6400, 8000);
        let weak = tone(1200.0, RATE, 0.1, 0.0, 160, 6400, 8000);
        let mut sig: Vec<f32> = strong.iter().zip(&weak).map(|(a, b)| a + b).collect();

        let wwv = ToneDetector::new(1000.0, RATE, 6400, 0.2);
        let wwvh = ToneDetector::new(1200.0, RATE, 6400, 0.2);
        wwv.cancel(&mut sig, 80.0, 6400, 40);

        // only the weak tone remains
        assert!(wwv.correlate(&sig, 80) < 0.01 * wwv.correlate(&strong, 80));
        assert_approx_eq!(wwvh.correlate(&weak, 160), wwvh.correlate(&sig, 160), 0.01);
        assert!(sig[..80].iter().all(|s| *s == 0.0));

        // nothing to fit
        let mut short = vec![0.5f32; 50];
        wwv.cancel(&mut short, 10.0, 60, 40);
        assert_eq!(vec![0.5f32; 50], short);
    }

    #[test]
    fn test_crossing() {
        let env = [0.0, 0.2, 0.6, 1.0, 1.0];
        assert_approx_eq!(1.75, first_crossing(&env, 0.5).unwrap());
        assert_eq!(None, first_crossing(&env, 2.0));
        assert_eq!(Some(0.0), first_crossing(&env, 0.0));
    }
}
