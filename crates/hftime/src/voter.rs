//! Cross-channel station voter
//!
//! Channel processes share their per-minute station evidence
//! through a directory tree:
//!
//! ```txt
//! <root>/<minute key>/<channel>__<station>.json
//! ```
//!
//! Every file has exactly one writer: the process that owns the
//! channel. Writes go to a uniquely-named temporary file in the
//! same directory, which is then renamed over the final name.
//! Readers therefore see either the old record or the new one,
//! never a torn write, and no locks are needed.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

#[cfg(not(test))]
use log::{debug, trace, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as trace;
#[cfg(test)]
use std::println as warn;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::clock::MinuteKey;
use crate::station::Station;

/// Default anchor retention (minutes)
pub const DEFAULT_RETENTION_MINUTES: i64 = 60;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// How an anchor's station was established
///
/// Ordered from least to most trusted.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AnchorQuality {
    /// Weak or ambiguous local evidence
    LowConfidenceGuess,

    /// Historical prediction
    StatisticalPrediction,

    /// Strong local tone detection
    HighConfidenceAcoustic,

    /// Station identification tone
    VerifiedGroundTruth,
}

/// One channel's station evidence for one minute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationAnchor {
    /// Minute
    pub minute: MinuteKey,

    /// Publishing channel
    pub channel: String,

    /// Station
    pub station: Station,

    /// Tone arrival after the minute boundary, in native samples
    ///
    /// Zero when the station's tone was not timed.
    pub toa_offset_samples: i64,

    /// SNR of the evidence (dB)
    pub snr_db: f32,

    /// Confidence, from 0 to 1
    pub confidence: f32,

    /// Quality rank
    pub quality: AnchorQuality,

    /// When the anchor was written
    pub written_at: DateTime<Utc>,
}

impl StationAnchor {
    /// Ranking order between anchors for the same minute
    ///
    /// Compares quality, then confidence, then SNR. Remaining
    /// ties go to the lexically-smaller channel name, which
    /// compares as *greater*.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.quality
            .cmp(&other.quality)
            .then_with(|| self.confidence.total_cmp(&other.confidence))
            .then_with(|| self.snr_db.total_cmp(&other.snr_db))
            .then_with(|| other.channel.cmp(&self.channel))
    }
}

/// Handle to a shared anchor store
///
/// Any number of handles, in any number of processes, may
/// use the same root.
#[derive(Debug)]
pub struct GlobalVoter {
    root: PathBuf,
    counter: AtomicU64,
}

impl GlobalVoter {
    /// Open the store at `root`, creating it if necessary
    pub fn open<P>(root: P) -> Result<Self, VoterError>
    where
        P: Into<PathBuf>,
    {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| VoterError::Io(root.clone(), e))?;
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish `anchor`, replacing this channel's earlier record
    ///
    /// Returns the path of the record. The channel name becomes
    /// part of a file name and must be usable as one verbatim:
    /// ASCII letters, digits, `-`, `_`, and `.`, not leading `.`.
    pub fn publish(&self, anchor: &StationAnchor) -> Result<PathBuf, VoterError> {
        if !is_file_safe(&anchor.channel) {
            return Err(VoterError::ChannelName(anchor.channel.clone()));
        }
        let dir = self.minute_dir(anchor.minute);
        fs::create_dir_all(&dir).map_err(|e| VoterError::Io(dir.clone(), e))?;

        let name = format!("{}__{}", anchor.channel, anchor.station.as_str());
        let path = dir.join(format!("{}.{}", name, RECORD_EXTENSION));
        let tmp = dir.join(format!(
            ".{}.{}.{}.{}",
            name,
            std::process::id(),
            self.counter.fetch_add(1, AtomicOrdering::Relaxed),
            TEMP_EXTENSION
        ));
        write_json_atomic(&path, &tmp, anchor)?;
        trace!("published {}", path.display());
        Ok(path)
    }

    /// All readable anchors for `minute`
    ///
    /// A minute nobody has written is empty, not an error.
    /// Temporary files, unreadable records, and directory entries
    /// which cannot be listed are skipped.
    pub fn anchors(&self, minute: MinuteKey) -> Result<Vec<StationAnchor>, VoterError> {
        let dir = self.minute_dir(minute);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VoterError::Io(dir, e)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("{}: skipping entry: {}", dir.display(), e);
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_json::<StationAnchor>(&path) {
                Ok(anchor) if anchor.minute == minute => out.push(anchor),
                Ok(_) => debug!("{}: record is for another minute", path.display()),
                Err(e) => debug!("skipping anchor: {}", e),
            }
        }
        Ok(out)
    }

    /// Best anchor for `minute`, by [`StationAnchor::rank_cmp`]
    ///
    /// Anchors from `exclude_channel` are ignored.
    pub fn best_anchor(
        &self,
        minute: MinuteKey,
        exclude_channel: Option<&str>,
    ) -> Result<Option<StationAnchor>, VoterError> {
        Ok(self
            .anchors(minute)?
            .into_iter()
            .filter(|a| Some(a.channel.as_str()) != exclude_channel)
            .max_by(|a, b| a.rank_cmp(b)))
    }

    /// Remove minutes older than `keep_minutes` before `now`
    ///
    /// Returns the number of minutes removed. Directories which
    /// are not minute keys are left alone. Other processes may
    /// prune the same root concurrently; a minute they removed
    /// first is not counted and is not an error.
    pub fn prune(&self, now: MinuteKey, keep_minutes: i64) -> Result<usize, VoterError> {
        let oldest = now.0 - keep_minutes.max(0);
        let entries = fs::read_dir(&self.root).map_err(|e| VoterError::Io(self.root.clone(), e))?;

        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("{}: skipping entry: {}", self.root.display(), e);
                    continue;
                }
            };
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<i64>().ok());
            match key {
                Some(key) if key < oldest && path.is_dir() => match fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        trace!("{}: already pruned", path.display())
                    }
                    Err(e) => return Err(VoterError::Io(path, e)),
                },
                _ => {}
            }
        }
        if removed > 0 {
            debug!("pruned {} minutes before {}", removed, MinuteKey(oldest));
        }
        Ok(removed)
    }

    fn minute_dir(&self, minute: MinuteKey) -> PathBuf {
        self.root.join(minute.0.to_string())
    }
}

/// Anchor store failure
#[derive(Error, Debug)]
pub enum VoterError {
    /// Filesystem error
    #[error("{0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    /// Record could not be encoded or decoded
    #[error("{0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),

    /// Channel name cannot be used in a file name
    #[error("channel name \"{0}\" must be ASCII letters, digits, '-', '_', or '.'")]
    ChannelName(String),
}

/// Serialize `value` to `tmp`, then rename it to `path`
pub(crate) fn write_json_atomic<T>(path: &Path, tmp: &Path, value: &T) -> Result<(), VoterError>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value).map_err(|e| VoterError::Json(path.to_owned(), e))?;
    fs::write(tmp, json).map_err(|e| VoterError::Io(tmp.to_owned(), e))?;
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        VoterError::Io(path.to_owned(), e)
    })
}

/// Read a JSON record
pub(crate) fn read_json<T>(path: &Path) -> Result<T, VoterError>
where
    T: DeserializeOwned,
{
    let data = fs::read(path).map_err(|e| VoterError::Io(path.to_owned(), e))?;
    serde_json::from_slice(&data).map_err(|e| VoterError::Json(path.to_owned(), e))
}

// Channel names become file names as-is, so that no two
// channels share a record
fn is_file_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn anchor(minute: i64, channel: &str, station: Station, quality: AnchorQuality) -> StationAnchor {
        StationAnchor {
            minute: MinuteKey(minute),
            channel: channel.to_owned(),
            station,
            toa_offset_samples: 160,
            snr_db: 20.0,
            confidence: 0.8,
            quality,
            written_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_ranking() {
        let low = anchor(1, "A", Station::Wwv, AnchorQuality::LowConfidenceGuess);
        let high = anchor(1, "B", Station::Wwvh, AnchorQuality::HighConfidenceAcoustic);
        assert_eq!(Ordering::Less, low.rank_cmp(&high));

        let mut more_confident = low.clone();
        more_confident.confidence = 0.9;
        assert_eq!(Ordering::Greater, more_confident.rank_cmp(&low));

        let mut louder = low.clone();
        louder.snr_db = 25.0;
        assert_eq!(Ordering::Greater, louder.rank_cmp(&low));

        // channel name breaks ties
        let mut other = low.clone();
        other.channel = "Z".to_owned();
        assert_eq!(Ordering::Greater, low.rank_cmp(&other));
        assert_eq!(Ordering::Equal, low.rank_cmp(&low.clone()));

        assert!(AnchorQuality::VerifiedGroundTruth > AnchorQuality::HighConfidenceAcoustic);
        assert!(AnchorQuality::StatisticalPrediction > AnchorQuality::LowConfidenceGuess);
    }

    #[test]
    fn test_round_trip_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let reader = GlobalVoter::open(dir.path()).unwrap();
        assert_eq!(None, reader.best_anchor(MinuteKey(100), None).unwrap());

        // a separate handle shares nothing with the reader but the root
        let writer = GlobalVoter::open(dir.path()).unwrap();
        writer
            .publish(&anchor(100, "WWV_5", Station::Wwv, AnchorQuality::LowConfidenceGuess))
            .unwrap();
        writer
            .publish(&anchor(
                100,
                "WWV_10",
                Station::Wwvh,
                AnchorQuality::HighConfidenceAcoustic,
            ))
            .unwrap();
        drop(writer);

        let best = reader.best_anchor(MinuteKey(100), None).unwrap().unwrap();
        assert_eq!("WWV_10", best.channel);
        assert_eq!(Station::Wwvh, best.station);
        assert_eq!(AnchorQuality::HighConfidenceAcoustic, best.quality);

        // excluding our own channel
        let best = reader
            .best_anchor(MinuteKey(100), Some("WWV_10"))
            .unwrap()
            .unwrap();
        assert_eq!("WWV_5", best.channel);

        // other minutes are unaffected
        assert!(reader.anchors(MinuteKey(101)).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let voter = GlobalVoter::open(dir.path()).unwrap();
        let mut rec = anchor(7, "WWV_15", Station::Wwv, AnchorQuality::LowConfidenceGuess);
        let first = voter.publish(&rec).unwrap();
        rec.quality = AnchorQuality::VerifiedGroundTruth;
        let second = voter.publish(&rec).unwrap();
        assert_eq!(first, second);

        let all = voter.anchors(MinuteKey(7)).unwrap();
        assert_eq!(1, all.len());
        assert_eq!(AnchorQuality::VerifiedGroundTruth, all[0].quality);

        // no temporary files are left behind
        let names: Vec<_> = fs::read_dir(dir.path().join("7"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(1, names.len());
    }

    #[test]
    fn test_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let voter = GlobalVoter::open(dir.path()).unwrap();
        voter
            .publish(&anchor(3, "CHU_7850", Station::Chu, AnchorQuality::LowConfidenceGuess))
            .unwrap();
        let mdir = dir.path().join("3");
        fs::write(mdir.join("broken__WWV.json"), b"{ not json").unwrap();
        fs::write(mdir.join(".half__WWV.99.0.tmp"), b"{").unwrap();

        let all = voter.anchors(MinuteKey(3)).unwrap();
        assert_eq!(1, all.len());
        assert_eq!(Station::Chu, all[0].station);
    }

    #[test]
    fn test_prune() {
        let dir = tempfile::tempdir().unwrap();
        let voter = GlobalVoter::open(dir.path()).unwrap();
        for minute in [10, 50, 69, 70] {
            voter
                .publish(&anchor(minute, "WWV_5", Station::Wwv, AnchorQuality::LowConfidenceGuess))
                .unwrap();
        }
        fs::create_dir(dir.path().join("notes")).unwrap();

        assert_eq!(1, voter.prune(MinuteKey(70), 50).unwrap());
        assert!(voter.anchors(MinuteKey(10)).unwrap().is_empty());
        assert_eq!(1, voter.anchors(MinuteKey(50)).unwrap().len());
        assert_eq!(1, voter.anchors(MinuteKey(70)).unwrap().len());
        assert!(dir.path().join("notes").is_dir());
    }

    #[test]
    fn test_prune_shared_root() {
        let dir = tempfile::tempdir().unwrap();
        let first = GlobalVoter::open(dir.path()).unwrap();
        let second = GlobalVoter::open(dir.path()).unwrap();
        for minute in [10, 11, 70] {
            first
                .publish(&anchor(minute, "WWV_5", Station::Wwv, AnchorQuality::LowConfidenceGuess))
                .unwrap();
        }

        assert_eq!(2, first.prune(MinuteKey(70), 50).unwrap());
        assert_eq!(0, second.prune(MinuteKey(70), 50).unwrap());
        assert_eq!(1, second.anchors(MinuteKey(70)).unwrap().len());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_minute_entries() {
        let dir = tempfile::tempdir().unwrap();
        let voter = GlobalVoter::open(dir.path()).unwrap();
        voter
            .publish(&anchor(5, "WWV_5", Station::Wwv, AnchorQuality::LowConfidenceGuess))
            .unwrap();

        // a dangling link and a directory are not records
        let mdir = dir.path().join("5");
        std::os::unix::fs::symlink(mdir.join("gone.json"), mdir.join("dangling__WWV.json")).unwrap();
        fs::create_dir(mdir.join("nested__WWV.json")).unwrap();

        let all = voter.anchors(MinuteKey(5)).unwrap();
        assert_eq!(1, all.len());
        assert_eq!("WWV_5", all[0].channel);
    }

    #[test]
    fn test_channel_names() {
        assert!(is_file_safe("WWV_10"));
        assert!(is_file_safe("chu-7.85"));
        assert!(!is_file_safe(""));
        assert!(!is_file_safe(".hidden"));
        assert!(!is_file_safe("a/b"));
        assert!(!is_file_safe("a b"));

        // names which would have collided as file names are refused
        let dir = tempfile::tempdir().unwrap();
        let voter = GlobalVoter::open(dir.path()).unwrap();
        voter
            .publish(&anchor(9, "a_b", Station::Wwv, AnchorQuality::LowConfidenceGuess))
            .unwrap();
        for bad in ["a/b", "a b"] {
            let rec = anchor(9, bad, Station::Wwvh, AnchorQuality::VerifiedGroundTruth);
            assert!(matches!(voter.publish(&rec), Err(VoterError::ChannelName(n)) if n == bad));
        }
        let all = voter.anchors(MinuteKey(9)).unwrap();
        assert_eq!(1, all.len());
        assert_eq!("a_b", all[0].channel);
    }
}
