//! Fetch modes and strategy selection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Configured download policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Whole file for short media, centred segment for long media
    #[default]
    Smart,
    /// Always extract a segment
    Segment,
    /// Always download the whole item
    Full,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Smart => "smart",
            FetchMode::Segment => "segment",
            FetchMode::Full => "full",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smart" => Ok(FetchMode::Smart),
            "segment" => Ok(FetchMode::Segment),
            // "aria2c" is the historical name of the forced whole-file mode
            "full" | "aria2c" => Ok(FetchMode::Full),
            other => Err(ModelError::UnknownFetchMode(other.to_string())),
        }
    }
}

/// How a single media item is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Whole media item; a parallel-chunk downloader may be used
    Full,
    /// Server-side extraction of `[start, end)` seconds
    Segment { start: f64, end: f64 },
}

impl FetchStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            FetchStrategy::Full => "full",
            FetchStrategy::Segment { .. } => "segment",
        }
    }

    /// Whether a parallel-chunk downloader can serve this strategy.
    pub fn allows_chunked_download(&self) -> bool {
        matches!(self, FetchStrategy::Full)
    }
}

/// Pick a fetch strategy from the duration estimate, window and mode.
///
/// Smart mode segments only when the duration is known and longer than the
/// window. Forced segment mode with an unknown duration takes the first
/// `window` seconds.
pub fn select_strategy(duration_estimate: Option<f64>, window: f64, mode: FetchMode) -> FetchStrategy {
    let known = duration_estimate.filter(|d| d.is_finite() && *d > 0.0);

    match mode {
        FetchMode::Full => FetchStrategy::Full,
        FetchMode::Smart => match known {
            Some(duration) if duration > window => centered_window(duration, window),
            _ => FetchStrategy::Full,
        },
        FetchMode::Segment => match known {
            Some(duration) => centered_window(duration, window),
            None => FetchStrategy::Segment {
                start: 0.0,
                end: window,
            },
        },
    }
}

/// A `window`-second segment centred on the midpoint of the media.
///
/// Clamped to `[0, duration]` when the media is shorter than the window.
pub fn centered_window(duration: f64, window: f64) -> FetchStrategy {
    let start = (duration / 2.0 - window / 2.0).max(0.0);
    let end = (start + window).min(duration);
    FetchStrategy::Segment { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smart_short_media_is_full() {
        assert_eq!(select_strategy(Some(8.0), 10.0, FetchMode::Smart), FetchStrategy::Full);
        assert_eq!(select_strategy(Some(10.0), 10.0, FetchMode::Smart), FetchStrategy::Full);
        assert_eq!(select_strategy(None, 10.0, FetchMode::Smart), FetchStrategy::Full);
    }

    #[test]
    fn test_smart_long_media_is_centred_segment() {
        let strategy = select_strategy(Some(600.0), 10.0, FetchMode::Smart);
        assert_eq!(strategy, FetchStrategy::Segment { start: 295.0, end: 305.0 });
        assert!(!strategy.allows_chunked_download());
    }

    #[test]
    fn test_forced_modes_override() {
        assert_eq!(select_strategy(Some(600.0), 10.0, FetchMode::Full), FetchStrategy::Full);
        assert_eq!(
            select_strategy(Some(6.0), 10.0, FetchMode::Segment),
            FetchStrategy::Segment { start: 0.0, end: 6.0 }
        );
        assert_eq!(
            select_strategy(None, 10.0, FetchMode::Segment),
            FetchStrategy::Segment { start: 0.0, end: 10.0 }
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Smart".parse::<FetchMode>().unwrap(), FetchMode::Smart);
        assert_eq!("aria2c".parse::<FetchMode>().unwrap(), FetchMode::Full);
        assert!("fastest".parse::<FetchMode>().is_err());
    }
}
