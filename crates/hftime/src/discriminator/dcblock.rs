//! DC removal for amplitude envelopes

use crate::filter::Window;

/// Strips the carrier level from an envelope
///
/// Two cascaded moving averages of `len` samples estimate the
/// local mean, which is subtracted from the input delayed by
/// `len - 1` (R. Yates, "DC Blocker Algorithms," IEEE Sig.
/// Proc. Mag., March 2008). The response is linear-phase.
///
/// Tones at multiples of `rate / len` pass with unity gain, so
/// pick `len` to put the minute tones on that grid. A length
/// of `1` passes everything.
#[derive(Clone, Debug)]
pub struct DCBlocker {
    ff: MovingAverage,
    fb: MovingAverage,
}

impl DCBlocker {
    /// Create DC blocker
    ///
    /// The delay is `len - 1`. A `len` of zero is treated as one.
    pub fn new(len: usize) -> Self {
        DCBlocker {
            ff: MovingAverage::new(len),
            fb: MovingAverage::new(len),
        }
    }

    /// Group delay, in samples
    pub fn delay(&self) -> usize {
        self.ff.len() - 1
    }

    /// Reset to zero initial conditions
    pub fn reset(&mut self) {
        self.ff.reset();
        self.fb.reset();
    }

    /// Filter one sample
    ///
    /// The output lags the input by [`delay()`](#method.delay).
    pub fn filter(&mut self, input: f32) -> f32 {
        let (ma0, sig) = self.ff.filter(input);
        let (ma1, _) = self.fb.filter(ma0);
        sig - ((self.ff.len() > 1) as u8 as f32) * ma1
    }

    /// AC-couple a whole block, without delay
    ///
    /// The block is extended at both ends by reflection, which
    /// primes the filter without a turn-on transient and flushes
    /// its delay. Output sample `i` corresponds to input sample
    /// `i`. The filter is reset afterwards.
    pub fn ac_couple(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        let last = input.len() - 1;
        let delay = self.delay();
        self.reset();

        for k in (1..=2 * delay).rev() {
            self.filter(input[k.min(last)]);
        }
        let tail = (1..=delay).map(|k| input[last.saturating_sub(k)]);
        let mut out = Vec::with_capacity(input.len());
        for (i, sa) in input.iter().copied().chain(tail).enumerate() {
            let y = self.filter(sa);
            if i >= delay {
                out.push(y);
            }
        }
        self.reset();
        out
    }
}

// Running-sum boxcar average over `len` samples
#[derive(Clone, Debug)]
struct MovingAverage {
    window: Window<f32>,
    inv_len: f32,
    moving_sum: f32,
}

impl MovingAverage {
    fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            window: Window::new(len),
            inv_len: 1.0f32 / (len as f32),
            moving_sum: 0.0f32,
        }
    }

    fn reset(&mut self) {
        self.window.reset();
        self.moving_sum = 0.0f32;
    }

    #[inline]
    fn len(&self) -> usize {
        self.window.len()
    }

    // Returns the moving average and the input delayed
    // by the window
    #[inline]
    fn filter(&mut self, input: f32) -> (f32, f32) {
        let aged = self.window.push_scalar(input);
        self.moving_sum += input - aged;
        (self.moving_sum * self.inv_len, self.window.front())
    }
}
