//! # FIR linear filters
//!
//! The [`FilterCoeff`] implements the multiply-accumulate
//! operation of a Finite Impulse Response filter, and the
//! [`Window`] implements the sliding sample history which
//! feeds it.
//!
//! ```txt
//! // the sample L is the youngest sample, and O is the oldest
//! // [ O | N | M | L ]
//! ```
//!
//! To advance time, push a new sample onto the right side of
//! the `Window`; the oldest sample ages off the left.
//!
//! This module also designs the filters we need: windowed-sinc
//! low-pass filters for the decimator, and the Blackman and
//! Tukey tapers used by the filter design and by the tone
//! detector's templates.

use std::collections::VecDeque;
use std::convert::AsRef;
use std::f64::consts::PI;

use nalgebra::base::Scalar;
use nalgebra::DVector;
use num_traits::Zero;

/// FIR filter coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCoeff(DVector<f32>);

impl FilterCoeff {
    /// Create from slice
    ///
    /// Creates FIR filter coefficients with the specified impulse
    /// response `h`. The coefficients `h` use the same representation
    /// as GNU Octave's `filter()` function.
    pub fn from_slice<S>(h: S) -> Self
    where
        S: AsRef<[f32]>,
    {
        let inp = h.as_ref();
        FilterCoeff(DVector::from_iterator(inp.len(), inp.iter().copied()))
    }

    /// Design a linear-phase low-pass filter
    ///
    /// Windowed-sinc design with a Blackman window. `cutoff` is
    /// the -6 dB frequency as a fraction of the sampling rate,
    /// `0.0 < cutoff < 0.5`. The filter has `len` taps, rounded
    /// up to the next odd number so that the impulse response
    /// has a center tap. Taps are normalized for unity gain at
    /// DC.
    ///
    /// The transition band of a Blackman design is about
    /// [`BLACKMAN_TRANSITION`]` / len` wide, centered on `cutoff`.
    pub fn lowpass(cutoff: f64, len: usize) -> Self {
        let len = len.max(1) | 1;
        let center = (len / 2) as f64;
        let taper = blackman(len);
        let mut taps: Vec<f64> = (0..len)
            .map(|n| {
                let x = n as f64 - center;
                let sinc = if x == 0.0 {
                    2.0 * cutoff
                } else {
                    (2.0 * PI * cutoff * x).sin() / (PI * x)
                };
                sinc * taper[n]
            })
            .collect();
        let gain: f64 = taps.iter().sum();
        for t in &mut taps {
            *t /= gain;
        }
        FilterCoeff(DVector::from_iterator(len, taps.iter().map(|t| *t as f32)))
    }

    /// Number of filter coefficients
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the filter has no taps
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the impulse response is symmetric (linear phase)
    pub fn is_symmetric(&self) -> bool {
        let s = self.as_slice();
        s.iter().zip(s.iter().rev()).all(|(a, b)| a == b)
    }

    /// Perform FIR filtering with the given sample history
    ///
    /// `history` must output the oldest sample first and the
    /// newest sample last. The newest sample is used for
    /// feedforward lag 0. `history` SHOULD contain at least
    /// `self.len()` samples, but no error is raised if it is
    /// shorter.
    pub fn filter<W, In, Out>(&self, history: W) -> Out
    where
        W: IntoIterator<Item = In>,
        W::IntoIter: DoubleEndedIterator,
        In: Copy + Scalar + std::ops::Mul<f32, Output = Out>,
        Out: Copy + Scalar + Zero + std::ops::AddAssign,
    {
        multiply_accumulate(history, self.as_ref())
    }

    /// Return filter coefficients as slice
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        self.0.as_slice()
    }
}

impl AsRef<[f32]> for FilterCoeff {
    #[inline]
    fn as_ref(&self) -> &[f32] {
        self.as_slice()
    }
}

/// Approximate transition width of a Blackman design, × taps
///
/// A Blackman windowed-sinc filter of `N` taps moves from
/// passband to its stopband (about -74 dB) over roughly
/// `BLACKMAN_TRANSITION / N` of the sampling rate.
pub const BLACKMAN_TRANSITION: f64 = 5.5;

/// Blackman window of length `len`
pub fn blackman(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let m = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let x = n as f64 / m;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Tukey (cosine-tapered) window of length `len`
///
/// The first and last `alpha / 2` fraction of the window are
/// raised-cosine edges; the middle is flat at 1.0. An `alpha`
/// of 0 is rectangular and 1 is a Hann window.
pub fn tukey(len: usize, alpha: f64) -> Vec<f64> {
    let alpha = alpha.clamp(0.0, 1.0);
    if len < 2 || alpha == 0.0 {
        return vec![1.0; len];
    }
    let m = (len - 1) as f64;
    let edge = alpha * m / 2.0;
    (0..len)
        .map(|n| {
            let n = n as f64;
            if n < edge {
                0.5 * (1.0 - (PI * n / edge).cos())
            } else if n > m - edge {
                0.5 * (1.0 - (PI * (m - n) / edge).cos())
            } else {
                1.0
            }
        })
        .collect()
}

/// Filter window
///
/// Implements a fixed-size lookback window for FIR filters
/// or other purposes.
#[derive(Clone, Debug)]
pub struct Window<T>(VecDeque<T>)
where
    T: Copy + Scalar + Zero;

impl<T> Window<T>
where
    T: Copy + Scalar + Zero,
{
    /// Create empty window, filling it with zeros
    ///
    /// Creates a new `Window` with the given `len`gth
    pub fn new(len: usize) -> Self {
        let mut q = VecDeque::with_capacity(len);
        q.resize(len, T::zero());
        Self(q)
    }

    /// Reset to zero initial conditions
    pub fn reset(&mut self) {
        for s in &mut self.0 {
            *s = T::zero()
        }
    }

    /// Window length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the window holds no samples
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append to sample window
    ///
    /// Appends the `input` slice to the right side of the Window.
    /// If the length of `input` exceeds the length of the Window,
    /// then the right-most chunk of `input` will be taken.
    pub fn push<S>(&mut self, input: S)
    where
        S: AsRef<[T]>,
    {
        let input = input.as_ref();
        let input = if input.len() > self.0.len() {
            let start = input.len() - self.0.len();
            &input[start..]
        } else {
            input
        };

        std::mem::drop(self.0.drain(0..input.len()));
        self.0.extend(input);
    }

    /// Append a scalar to the sample window
    ///
    /// Returns the sample that was formerly the oldest
    /// sample in the Window.
    #[inline]
    pub fn push_scalar(&mut self, input: T) -> T {
        let out = self.0.pop_front().unwrap_or(T::zero());
        self.0.push_back(input);
        out
    }

    /// Iterator over window contents, least recent first
    pub fn iter(&self) -> <&Window<T> as IntoIterator>::IntoIter {
        self.into_iter()
    }

    /// Copy window contents to a vector, least recent first
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Most recent element pushed into the Window
    #[inline]
    pub fn back(&self) -> T {
        self.0.back().copied().unwrap_or(T::zero())
    }

    /// Least recent element pushed into the Window
    #[inline]
    pub fn front(&self) -> T {
        self.0.front().copied().unwrap_or(T::zero())
    }
}

impl<'a, T> IntoIterator for &'a Window<T>
where
    T: Copy + Scalar + Zero,
{
    type Item = T;

    type IntoIter = std::iter::Copied<std::collections::vec_deque::Iter<'a, T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

// Multiply-accumulate operation
//
// ```txt
// out = Σ history[N - 1 - i] * coeff[i]
// ```
//
// The most recent sample is the last one output by `history`
// and is multiplied with `coeff[0]`. If `history` is shorter
// than `coeff`, the missing history is zero.
fn multiply_accumulate<W, In, Coeff, Out>(history: W, coeff: &[Coeff]) -> Out
where
    W: IntoIterator<Item = In>,
    W::IntoIter: DoubleEndedIterator,
    In: Copy + Scalar + std::ops::Mul<Coeff, Output = Out>,
    Coeff: Copy + Scalar,
    Out: Copy + Scalar + Zero + std::ops::AddAssign,
{
    let history = history.into_iter();
    let mut out = Out::zero();
    for (hi, co) in history.rev().zip(coeff.iter()) {
        out += hi * *co;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    use num_complex::Complex;

    #[test]
    fn test_multiply_accumulate() {
        let out = multiply_accumulate(&[0.0f32; 0], &[0.0f32; 0]);
        assert_eq!(0.0f32, out);

        let out = multiply_accumulate(&[20.0f32, 1.0f32], &[1.0f32]);
        assert_eq!(1.0f32, out);
        let out = multiply_accumulate(&[1.0f32], &[1.0f32, 20.0f32]);
        assert_eq!(1.0f32, out);

        let out = multiply_accumulate(&[20.0f32, 20.0f32], &[1.0f32, -1.0f32]);
        assert_approx_eq!(0.0f32, out);
    }

    #[test]
    fn test_filter_cplx() {
        const INPUT: &[Complex<f32>] = &[Complex {
            re: 0.5f32,
            im: 0.5f32,
        }];

        let filter = FilterCoeff::from_slice([2.0f32, 0.0f32, 0.0f32]);

        let out: Complex<f32> = filter.filter(INPUT.iter().copied());
        assert_approx_eq!(out.re, 1.0f32);
        assert_approx_eq!(out.im, 1.0f32);
    }

    #[test]
    fn test_lowpass_design() {
        let lp = FilterCoeff::lowpass(0.1, 50);
        assert_eq!(51, lp.len());
        assert!(lp.is_symmetric());

        // unity DC gain
        let dc: f32 = lp.as_slice().iter().sum();
        assert_approx_eq!(1.0f32, dc, 1.0e-5);

        // a tone well into the stopband is crushed
        let tone: Vec<f32> = (0..lp.len())
            .map(|n| (2.0 * std::f32::consts::PI * 0.3 * n as f32).cos())
            .collect();
        let out: f32 = lp.filter(tone.iter().copied());
        assert!(out.abs() < 1.0e-3, "stopband leak {}", out);
    }

    #[test]
    fn test_tapers() {
        let w = tukey(101, 0.2);
        assert_approx_eq!(0.0, w[0]);
        assert_approx_eq!(0.0, w[100]);
        assert_approx_eq!(1.0, w[50]);
        assert_approx_eq!(w[5], w[95]);
        assert_eq!(vec![1.0; 4], tukey(4, 0.0));

        let b = blackman(5);
        assert_approx_eq!(0.0, b[0], 1.0e-12);
        assert_approx_eq!(1.0, b[2], 1.0e-12);
    }

    #[test]
    fn test_window() {
        let mut wind: Window<f32> = Window::new(4);
        assert_eq!(4, wind.len());
        assert_eq!(vec![0.0f32, 0.0f32, 0.0f32, 0.0f32], wind.to_vec());
        wind.push([1.0f32]);
        assert_eq!(vec![0.0f32, 0.0f32, 0.0f32, 1.0f32], wind.to_vec());

        wind.push([-1.0f32, -2.0f32, 1.0f32, 2.0f32, 3.0f32, 4.0f32]);
        assert_eq!(vec![1.0f32, 2.0f32, 3.0f32, 4.0f32], wind.to_vec());
        assert_eq!(4.0f32, wind.back());
        assert_eq!(1.0f32, wind.front());

        assert_eq!(1.0f32, wind.push_scalar(10.0f32));
        assert_eq!(vec![2.0f32, 3.0f32, 4.0f32, 10.0f32], wind.to_vec());

        wind.reset();
        assert_eq!(vec![0.0f32, 0.0f32, 0.0f32, 0.0f32], wind.to_vec());
    }
}
