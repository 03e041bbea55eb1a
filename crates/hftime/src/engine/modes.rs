//! Propagation modes and hop geometry
//!
//! Skywave paths are modelled as `n` equal hops off a mirror
//! layer at a fixed virtual height, over a spherical earth.
//! For a ground range `D`, each hop subtends a central angle
//! `θ = D / (n·R)`, and each half-hop is the straight chord
//! from the ground to the reflection point:
//!
//! ```txt
//! s = √(R² + (R+h)² − 2·R·(R+h)·cos(θ/2))
//! path = 2·n·s
//! ```
//!
//! The takeoff elevation is
//! `atan2((R+h)·cos(θ/2) − R, (R+h)·sin(θ/2))`. Modes which
//! would leave the ground below the minimum elevation are
//! infeasible.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::station::EARTH_RADIUS_KM;

/// Speed of light (km/ms)
pub const SPEED_OF_LIGHT_KM_PER_MS: f64 = 299.792458;

/// Virtual height of the E layer (km)
pub const E_LAYER_KM: f64 = 110.0;

/// Virtual height of the F2 layer (km)
pub const F2_LAYER_KM: f64 = 300.0;

/// Reflecting layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Groundwave; no reflection
    Ground,

    /// E layer
    E,

    /// F2 layer
    F2,
}

impl Layer {
    /// Virtual reflection height (km)
    pub fn height_km(&self) -> f64 {
        match self {
            Layer::Ground => 0.0,
            Layer::E => E_LAYER_KM,
            Layer::F2 => F2_LAYER_KM,
        }
    }
}

/// A propagation mode: layer and hop count
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropagationMode {
    /// Reflecting layer
    pub layer: Layer,

    /// Number of hops; zero for groundwave
    pub hops: u8,
}

impl PropagationMode {
    /// Groundwave
    pub const GROUNDWAVE: PropagationMode = PropagationMode {
        layer: Layer::Ground,
        hops: 0,
    };

    /// Short label, like `GW`, `1E`, or `3F2`
    pub fn label(&self) -> String {
        match self.layer {
            Layer::Ground => "GW".to_owned(),
            Layer::E => format!("{}E", self.hops),
            Layer::F2 => format!("{}F2", self.hops),
        }
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One feasible path between station and receiver
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropagationPath {
    /// Mode
    pub mode: PropagationMode,

    /// Total path length (km)
    pub path_km: f64,

    /// Takeoff elevation (degrees)
    pub elevation_deg: f64,

    /// Propagation delay (ms)
    pub delay_ms: f64,
}

/// Which modes to consider
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModeSearch {
    /// Groundwave is feasible only this close (km)
    pub groundwave_max_km: f64,

    /// Lowest usable takeoff elevation (degrees)
    pub min_elevation_deg: f64,

    /// Largest number of E-layer hops
    pub max_e_hops: u8,

    /// Largest number of F2-layer hops
    pub max_f2_hops: u8,
}

impl Default for ModeSearch {
    fn default() -> Self {
        Self {
            groundwave_max_km: 200.0,
            min_elevation_deg: 1.0,
            max_e_hops: 1,
            max_f2_hops: 4,
        }
    }
}

impl ModeSearch {
    /// Feasible paths for a ground range of `ground_km`
    ///
    /// Paths are listed groundwave first, then by layer and
    /// hop count.
    pub fn paths(&self, ground_km: f64) -> Vec<PropagationPath> {
        let ground_km = ground_km.max(0.0);
        let mut out = Vec::new();
        if ground_km <= self.groundwave_max_km {
            out.push(PropagationPath {
                mode: PropagationMode::GROUNDWAVE,
                path_km: ground_km,
                elevation_deg: 0.0,
                delay_ms: ground_km / SPEED_OF_LIGHT_KM_PER_MS,
            });
        }

        let skywave = (1..=self.max_e_hops)
            .map(|hops| (Layer::E, hops))
            .chain((1..=self.max_f2_hops).map(|hops| (Layer::F2, hops)));
        for (layer, hops) in skywave {
            let (path_km, elevation_deg) = hop_geometry(ground_km, hops, layer.height_km());
            if elevation_deg < self.min_elevation_deg {
                continue;
            }
            out.push(PropagationPath {
                mode: PropagationMode { layer, hops },
                path_km,
                elevation_deg,
                delay_ms: path_km / SPEED_OF_LIGHT_KM_PER_MS,
            });
        }
        out
    }
}

/// Path length (km) and takeoff elevation (degrees) of an
/// `hops`-hop path over `ground_km` off a layer at `height_km`
pub fn hop_geometry(ground_km: f64, hops: u8, height_km: f64) -> (f64, f64) {
    let r = EARTH_RADIUS_KM;
    let top = r + height_km;
    let half = ground_km / (2.0 * hops.max(1) as f64 * r);
    let chord = (r * r + top * top - 2.0 * r * top * half.cos()).max(0.0).sqrt();
    let elevation = (top * half.cos() - r).atan2(top * half.sin());
    (2.0 * hops.max(1) as f64 * chord, elevation.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_geometry() {
        // straight up and down
        let (path, elev) = hop_geometry(0.0, 1, 300.0);
        assert_approx_eq!(600.0, path, 1.0e-6);
        assert_approx_eq!(90.0, elev, 1.0e-6);

        // path always exceeds the ground range
        for hops in 1..=4 {
            let (path, _) = hop_geometry(2000.0, hops, 300.0);
            assert!(path > 2000.0);
        }

        // more hops means a longer path and steeper takeoff
        let (p1, e1) = hop_geometry(3000.0, 1, 300.0);
        let (p2, e2) = hop_geometry(3000.0, 2, 300.0);
        assert!(p2 > p1);
        assert!(e2 > e1);
    }

    #[test]
    fn test_feasible_modes() {
        let search = ModeSearch::default();

        let near = search.paths(100.0);
        assert_eq!(PropagationMode::GROUNDWAVE, near[0].mode);
        assert_approx_eq!(100.0 / SPEED_OF_LIGHT_KM_PER_MS, near[0].delay_ms);
        assert_eq!(6, near.len());

        // too far for groundwave or a single E hop
        let far = search.paths(5000.0);
        let labels: Vec<String> = far.iter().map(|p| p.mode.label()).collect();
        assert_eq!(vec!["2F2", "3F2", "4F2"], labels);
        for p in &far {
            assert!(p.elevation_deg >= 1.0);
            assert!(p.delay_ms > 5000.0 / SPEED_OF_LIGHT_KM_PER_MS);
        }

        // beyond four F2 hops
        assert!(search.paths(16000.0).is_empty());
    }

    #[test]
    fn test_labels() {
        assert_eq!("GW", PropagationMode::GROUNDWAVE.label());
        assert_eq!(
            "1E",
            PropagationMode {
                layer: Layer::E,
                hops: 1
            }
            .to_string()
        );
        assert_eq!(
            "3F2",
            PropagationMode {
                layer: Layer::F2,
                hops: 3
            }
            .label()
        );
    }
}
