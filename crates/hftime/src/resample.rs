//! Zero-phase cascaded decimation
//!
//! The [`Resampler`] reduces the native sample rate by an integer
//! ratio in one or more [`DecimationStage`]s. Each stage applies a
//! symmetric, odd-length, linear-phase low-pass filter *centered*
//! on the output sample: output `k` of a stage with ratio `M` is
//! the filtered input at index `k·M`, using `H` samples on either
//! side of it. The filter therefore introduces no group delay; the
//! price is a lookahead of `H` input samples per stage.
//!
//! ```txt
//!   input index:   0 ... kM-H ... kM ... kM+H
//!                         [-----  taps -----]
//!                                  ^ output k
//! ```
//!
//! Samples before the first input are taken to be zero. Because
//! the filter history and the decimation phase carry across calls,
//! feeding a stream in pieces produces exactly the same output as
//! feeding it all at once.
//!
//! A stream of `N` inputs yields `⌈N/M⌉` outputs per stage once
//! [`flush()`](Resampler::flush) supplies the trailing lookahead.

use num_complex::Complex;
use num_traits::Zero;

use crate::filter::{FilterCoeff, Window, BLACKMAN_TRANSITION};

/// Permitted transition bandwidths, as a fraction of the output rate
///
/// At the upper bound the passband edge sits at half of the
/// output Nyquist frequency.
pub const TRANSITION_RANGE: (f64, f64) = (0.01, 0.5);

/// One integer-ratio decimation stage
#[derive(Clone, Debug)]
pub struct DecimationStage {
    ratio: usize,
    half: usize,
    coeff: FilterCoeff,
    history: Window<Complex<f32>>,
    pushed: u64,
    next_center: u64,
}

impl DecimationStage {
    /// New stage with decimation `ratio`
    ///
    /// The anti-aliasing filter passes `(0.5 - transition/2) / ratio`
    /// of the input rate and reaches full stopband attenuation at
    /// the output Nyquist frequency, `0.5 / ratio`. `transition`
    /// is the width of the transition band as a fraction of the
    /// *output* rate and is clamped to [`TRANSITION_RANGE`]. A `ratio`
    /// of one is a pass-through.
    pub fn new(ratio: u32, transition: f64) -> Self {
        let ratio = ratio.max(1) as usize;
        let coeff = if ratio == 1 {
            FilterCoeff::from_slice([1.0f32])
        } else {
            let transition = transition.clamp(TRANSITION_RANGE.0, TRANSITION_RANGE.1);
            let width = transition / ratio as f64;
            let cutoff = (0.5 - transition / 2.0) / ratio as f64;
            let len = (BLACKMAN_TRANSITION / width).ceil() as usize + 1;
            FilterCoeff::lowpass(cutoff, len)
        };
        let half = coeff.len() / 2;
        Self {
            ratio,
            half,
            history: Window::new(coeff.len()),
            coeff,
            pushed: 0,
            next_center: 0,
        }
    }

    /// Decimation ratio
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Number of filter taps
    pub fn taps(&self) -> usize {
        self.coeff.len()
    }

    /// Lookahead, in input samples
    ///
    /// An output is produced once this many input samples
    /// *after* its center have arrived.
    pub fn lookahead(&self) -> usize {
        self.half
    }

    /// Reset to zero initial conditions and zero phase
    pub fn reset(&mut self) {
        self.history.reset();
        self.pushed = 0;
        self.next_center = 0;
    }

    /// Filter and decimate `input`, appending to `out`
    pub fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<Complex<f32>>) {
        for &sa in input {
            self.step(sa, out);
        }
    }

    /// Drain the lookahead and reset
    ///
    /// Pads the stream with zeros until every output whose
    /// center lies within the real input has been emitted.
    /// The stage is then ready for a new stream.
    pub fn flush(&mut self, out: &mut Vec<Complex<f32>>) {
        let end = self.pushed;
        while self.next_center < end {
            self.step(Complex::zero(), out);
        }
        self.reset();
    }

    #[inline]
    fn step(&mut self, sa: Complex<f32>, out: &mut Vec<Complex<f32>>) {
        self.history.push_scalar(sa);
        let newest = self.pushed;
        self.pushed += 1;
        if newest == self.next_center + self.half as u64 {
            out.push(self.coeff.filter(&self.history));
            self.next_center += self.ratio as u64;
        }
    }
}

/// Cascade of decimation stages
///
/// Build with a [`ResamplerBuilder`](crate::ResamplerBuilder).
/// Output `k` is centered on input sample `k × ratio()`.
#[derive(Clone, Debug)]
pub struct Resampler {
    stages: Vec<DecimationStage>,
}

impl Resampler {
    /// Cascade with the given per-stage ratios
    pub fn new(ratios: &[u32], transition: f64) -> Self {
        Self {
            stages: ratios
                .iter()
                .map(|r| DecimationStage::new(*r, transition))
                .collect(),
        }
    }

    /// Total decimation ratio
    pub fn ratio(&self) -> u64 {
        self.stages.iter().map(|st| st.ratio() as u64).product()
    }

    /// Stages, first to last
    pub fn stages(&self) -> &[DecimationStage] {
        &self.stages
    }

    /// Total lookahead, in input samples
    ///
    /// Output `k` becomes available once input sample
    /// `k × ratio() + lookahead()` has been processed.
    pub fn lookahead(&self) -> u64 {
        let mut scale = 1u64;
        let mut total = 0u64;
        for st in &self.stages {
            total += st.lookahead() as u64 * scale;
            scale *= st.ratio() as u64;
        }
        total
    }

    /// Decimate `input`
    ///
    /// Returns every output which the new input completes.
    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut carry = input.to_vec();
        for st in &mut self.stages {
            let mut out = Vec::with_capacity(carry.len() / st.ratio() + 1);
            st.process(&carry, &mut out);
            carry = out;
        }
        carry
    }

    /// Drain all lookahead and reset for a new stream
    pub fn flush(&mut self) -> Vec<Complex<f32>> {
        let mut carry: Vec<Complex<f32>> = Vec::new();
        for st in &mut self.stages {
            let mut out = Vec::with_capacity(carry.len() / st.ratio() + 1);
            st.process(&carry, &mut out);
            st.flush(&mut out);
            carry = out;
        }
        carry
    }

    /// Reset to zero initial conditions
    pub fn reset(&mut self) {
        for st in &mut self.stages {
            st.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tone(freq: f32, rate: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| Complex::from_polar(1.0f32, 2.0 * std::f32::consts::PI * freq * n as f32 / rate))
            .collect()
    }

    fn power(sa: &[Complex<f32>]) -> f32 {
        sa.iter().map(|s| s.norm_sqr()).sum::<f32>() / sa.len() as f32
    }

    #[test]
    fn test_stage_design() {
        let st = DecimationStage::new(40, 0.2);
        assert_eq!(1101, st.taps());
        assert_eq!(550, st.lookahead());

        let st = DecimationStage::new(1, 0.2);
        assert_eq!(1, st.taps());
        assert_eq!(0, st.lookahead());

        // out-of-range transitions are clamped
        let widest = DecimationStage::new(8, TRANSITION_RANGE.1);
        assert_eq!(widest.taps(), DecimationStage::new(8, 5.0).taps());
        assert!(widest.taps() < DecimationStage::new(8, 0.4).taps());
        let narrowest = DecimationStage::new(8, TRANSITION_RANGE.0);
        assert_eq!(narrowest.taps(), DecimationStage::new(8, 0.0).taps());
    }

    #[test]
    fn test_length() {
        // 2000 total-ratio periods
        const N: usize = 40 * 2000;
        let mut rs = Resampler::new(&[8, 5], 0.2);
        assert_eq!(40, rs.ratio());

        let input = vec![Complex::new(0.5f32, 0.0f32); N];
        let out = rs.process(&input);
        let expect = N as f32 / 40.0;
        assert!(out.len() as f32 >= 0.99 * expect, "got {}", out.len());
        assert_eq!(
            (N as u64 - 1 - rs.lookahead()) / 40 + 1,
            out.len() as u64
        );

        // flush completes the stream exactly
        let tail = rs.flush();
        assert_eq!(2000, out.len() + tail.len());

        // with a ragged length, too
        let out = rs.process(&input[0..N - 13]);
        let tail = rs.flush();
        assert_eq!((N - 13 + 39) / 40, out.len() + tail.len());
    }

    #[test]
    fn test_incremental_equals_batch() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let input: Vec<Complex<f32>> = (0..20000)
            .map(|_| Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect();

        let mut batch = Resampler::new(&[4, 5], 0.2);
        let mut expect = batch.process(&input);
        expect.extend(batch.flush());

        let mut piecewise = Resampler::new(&[4, 5], 0.2);
        let mut got = Vec::new();
        let mut rest = &input[..];
        while !rest.is_empty() {
            let n = rng.gen_range(1..700).min(rest.len());
            got.extend(piecewise.process(&rest[0..n]));
            rest = &rest[n..];
        }
        got.extend(piecewise.flush());

        assert_eq!(expect, got);
    }

    #[test]
    fn test_zero_phase() {
        // impulse at input 400 lands on output 20, symmetric
        let mut input = vec![Complex::zero(); 2000];
        input[400] = Complex::new(1.0f32, 0.0f32);

        let mut rs = Resampler::new(&[4, 5], 0.2);
        let mut out = rs.process(&input);
        out.extend(rs.flush());
        assert_eq!(100, out.len());

        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i);
        assert_eq!(Some(20), peak);
        for k in 1..10 {
            assert_approx_eq!(out[20 - k].re, out[20 + k].re, 1.0e-6);
        }
    }

    #[test]
    fn test_dc_gain() {
        let mut rs = Resampler::new(&[4, 5], 0.2);
        let out = rs.process(&vec![Complex::new(0.25f32, -0.5f32); 10000]);
        for sa in &out[20..out.len() - 20] {
            assert_approx_eq!(0.25f32, sa.re, 1.0e-4);
            assert_approx_eq!(-0.5f32, sa.im, 1.0e-4);
        }
    }

    #[test]
    fn test_nyquist_rejection() {
        // 16 kHz → 10 Hz, 30 seconds
        const RATE: f32 = 16000.0;
        const LEN: usize = 16000 * 30;

        let mut rs = Resampler::new(&[40, 40], 0.2);
        let inband = rs.process(&tone(1.0, RATE, LEN));
        rs.reset();
        let nyquist = rs.process(&tone(5.0, RATE, LEN));
        assert_eq!(inband.len(), nyquist.len());

        // skip the start-up transient
        let p_in = power(&inband[20..]);
        let p_ny = power(&nyquist[20..]);
        assert_approx_eq!(1.0f32, p_in, 1.0e-2);
        let rel_db = 10.0 * (p_ny / p_in).log10();
        assert!(rel_db < -40.0, "nyquist tone at {} dB", rel_db);
    }
}
