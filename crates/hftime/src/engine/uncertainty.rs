//! Timing uncertainty model

use serde::{Deserialize, Serialize};

/// Physics-based timing uncertainty
///
/// ```txt
/// σ = √(σ_floor² + σ_snr² + σ_spread² + σ_doppler²)
///
/// σ_snr     = k_snr · 10^(−SNR/20)
/// σ_spread  = k_spread · delay_spread
/// σ_doppler = k_doppler · doppler_spread
/// ```
///
/// All terms are in milliseconds. Each one grows as its channel
/// metric gets worse.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyModel {
    /// Irreducible timing error (ms)
    pub floor_ms: f64,

    /// Error at 0 dB SNR (ms)
    pub k_snr_ms: f64,

    /// Error per millisecond of delay spread
    pub k_spread: f64,

    /// Error per hertz of Doppler spread (ms/Hz)
    pub k_doppler_ms_per_hz: f64,
}

impl Default for UncertaintyModel {
    fn default() -> Self {
        Self {
            floor_ms: 0.1,
            k_snr_ms: 5.0,
            k_spread: 0.5,
            k_doppler_ms_per_hz: 1.0,
        }
    }
}

impl UncertaintyModel {
    /// One-sigma timing uncertainty (ms)
    ///
    /// Negative spreads are treated as zero.
    pub fn sigma_ms(&self, snr_db: f64, delay_spread_ms: f64, doppler_spread_hz: f64) -> f64 {
        let snr = self.k_snr_ms * 10.0f64.powf(-snr_db / 20.0);
        let spread = self.k_spread * delay_spread_ms.max(0.0);
        let doppler = self.k_doppler_ms_per_hz * doppler_spread_hz.max(0.0);
        (self.floor_ms.powi(2) + snr.powi(2) + spread.powi(2) + doppler.powi(2)).sqrt()
    }
}
