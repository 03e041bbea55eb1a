//! Time-standard stations and receive channels

use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use strum::EnumMessage;
use thiserror::Error;

/// Mean earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Shortwave time-standard station
///
/// Stations may be converted `from_str()` their call signs.
/// `Display` shows the call sign.
///
/// ```
/// use hftime::Station;
///
/// let st: Station = "WWVH".parse().unwrap();
/// assert_eq!(Station::Wwvh, st);
/// assert_eq!(1200.0, st.minute_tone_hz());
/// assert_eq!("WWVH", &format!("{}", st));
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumMessage,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
pub enum Station {
    /// NIST WWV, Fort Collins, Colorado
    #[strum(serialize = "WWV", detailed_message = "NIST WWV, Fort Collins CO")]
    #[serde(rename = "WWV")]
    Wwv,

    /// NIST WWVH, Kekaha, Kauai, Hawaii
    #[strum(serialize = "WWVH", detailed_message = "NIST WWVH, Kauai HI")]
    #[serde(rename = "WWVH")]
    Wwvh,

    /// NRC CHU, Ottawa, Ontario
    #[strum(serialize = "CHU", detailed_message = "NRC CHU, Ottawa ON")]
    #[serde(rename = "CHU")]
    Chu,
}

impl Station {
    /// Call sign
    pub fn as_str(&self) -> &'static str {
        self.get_serializations()[0]
    }

    /// Human-readable description
    pub fn as_display_str(&self) -> &'static str {
        self.get_detailed_message().unwrap_or("")
    }

    /// Frequency of the top-of-minute tone (Hz)
    pub fn minute_tone_hz(&self) -> f32 {
        match self {
            Station::Wwv | Station::Chu => 1000.0,
            Station::Wwvh => 1200.0,
        }
    }

    /// Duration of the top-of-minute tone (s)
    ///
    /// CHU marks the minute with a half-second tone; NIST
    /// stations with 800 ms.
    pub fn minute_tone_secs(&self) -> f32 {
        match self {
            Station::Wwv | Station::Wwvh => 0.8,
            Station::Chu => 0.5,
        }
    }

    /// Frequency of the once-per-second tick (Hz)
    pub fn tick_hz(&self) -> f32 {
        self.minute_tone_hz()
    }

    /// Duration of the once-per-second tick (s)
    pub fn tick_secs(&self) -> f32 {
        match self {
            Station::Wwv | Station::Wwvh => 0.005,
            Station::Chu => 0.3,
        }
    }

    /// True if the station broadcasts the 100 Hz BCD time code
    pub fn has_bcd_timecode(&self) -> bool {
        matches!(self, Station::Wwv | Station::Wwvh)
    }

    /// Transmitter site
    pub fn site(&self) -> SiteLocation {
        match self {
            Station::Wwv => SiteLocation::new(40.6781, -105.0469),
            Station::Wwvh => SiteLocation::new(21.9875, -159.7625),
            Station::Chu => SiteLocation::new(45.2950, -75.7539),
        }
    }

    /// Published emission offset of the minute mark (ms)
    ///
    /// All three stations put the leading edge of the minute
    /// tone on the UTC second.
    pub fn nominal_emission_offset_ms(&self) -> f64 {
        0.0
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic location, in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteLocation {
    /// Latitude, degrees north
    pub latitude: f64,

    /// Longitude, degrees east
    pub longitude: f64,
}

impl SiteLocation {
    /// New location from latitude and longitude (degrees)
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` (km)
    ///
    /// Haversine formula on a spherical earth.
    pub fn distance_km(&self, other: &SiteLocation) -> f64 {
        self.central_angle(other) * EARTH_RADIUS_KM
    }

    /// Great-circle central angle to `other` (radians)
    pub fn central_angle(&self, other: &SiteLocation) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * a.sqrt().min(1.0).asin()
    }
}

/// Stations audible on a channel
///
/// At most two stations share any one frequency.
pub type StationSet = ArrayVec<Station, 2>;

/// A receive channel: one carrier frequency
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    name: String,
    carrier_hz: f64,
    stations: StationSet,
}

impl ChannelInfo {
    /// Channel with an explicit station set
    ///
    /// Fails if `stations` is empty, lists a station twice,
    /// or names more than two stations.
    pub fn new<S>(name: S, carrier_hz: f64, stations: &[Station]) -> Result<Self, ChannelError>
    where
        S: Into<String>,
    {
        let mut set = StationSet::new();
        for st in stations {
            if set.contains(st) {
                return Err(ChannelError::DuplicateStation(*st));
            }
            set.try_push(*st)
                .map_err(|_| ChannelError::TooManyStations(stations.len()))?;
        }
        if set.is_empty() {
            return Err(ChannelError::NoStations);
        }
        Ok(Self {
            name: name.into(),
            carrier_hz,
            stations: set,
        })
    }

    /// Channel using the standard station plan for `carrier_hz`
    ///
    /// WWV and WWVH share 2.5, 5, 10, and 15 MHz. WWV alone
    /// uses 20 and 25 MHz. CHU uses 3.33, 7.85, and 14.67 MHz.
    pub fn standard<S>(name: S, carrier_hz: f64) -> Result<Self, ChannelError>
    where
        S: Into<String>,
    {
        let khz = (carrier_hz / 1000.0).round() as u32;
        let stations: &[Station] = match khz {
            2500 | 5000 | 10000 | 15000 => &[Station::Wwv, Station::Wwvh],
            20000 | 25000 => &[Station::Wwv],
            3330 | 7850 | 14670 => &[Station::Chu],
            _ => return Err(ChannelError::UnknownFrequency(carrier_hz)),
        };
        Self::new(name, carrier_hz, stations)
    }

    /// Channel name, unique among cooperating processes
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Carrier frequency (Hz)
    pub fn carrier_hz(&self) -> f64 {
        self.carrier_hz
    }

    /// Stations which can be heard on this channel
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// True if more than one station shares the frequency
    pub fn is_shared(&self) -> bool {
        self.stations.len() > 1
    }

    /// True if `station` can be heard on this channel
    pub fn carries(&self, station: Station) -> bool {
        self.stations.contains(&station)
    }
}

/// Invalid channel definition
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ChannelError {
    /// No stations given
    #[error("channel must carry at least one station")]
    NoStations,

    /// Station listed twice
    #[error("station {0} listed more than once")]
    DuplicateStation(Station),

    /// Too many stations
    #[error("at most two stations may share a channel, got {0}")]
    TooManyStations(usize),

    /// Frequency not in the standard plan
    #[error("no standard station plan for {0} Hz")]
    UnknownFrequency(f64),
}

impl FromStr for SiteLocation {
    type Err = std::num::ParseFloatError;

    /// Parse `"lat,lon"` in decimal degrees
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s.split_once(',').unwrap_or((s, ""));
        Ok(Self::new(lat.trim().parse()?, lon.trim().parse()?))
    }
}
