//! Candidates and bank entries.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fetch::FetchStrategy;
use crate::media::MediaRef;
use crate::theme::ThemeId;

/// File extension of every clip the slicer writes.
pub const CLIP_EXTENSION: &str = "wav";

/// Width of the zero-padded sequence number in bank file names.
pub const SEQ_WIDTH: usize = 3;

/// A sliced clip waiting in the staging area to be placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Staged clip file
    pub path: PathBuf,
    /// Media the clip was cut from
    pub media: MediaRef,
    /// Theme whose search produced the media
    pub origin: ThemeId,
    /// Zero-based slice index within the excerpt
    pub slice_index: u32,
    /// Offset from the excerpt start, in seconds
    pub offset_secs: f64,
    /// Clip length in seconds
    pub duration_secs: f64,
    /// How the excerpt was fetched
    pub strategy: FetchStrategy,
    /// Per-theme similarity scores, indexed by theme id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<f64>>,
}

impl Candidate {
    /// Score for a given theme, when the candidate was scored.
    pub fn score_for(&self, theme: ThemeId) -> Option<f64> {
        self.scores.as_ref()?.get(theme.index()).copied()
    }
}

/// A placed clip inside a theme's bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankEntry {
    pub theme: ThemeId,
    /// One-based sequence number within the theme
    pub seq: u32,
    pub path: PathBuf,
}

impl BankEntry {
    /// File name for the `seq`-th entry of a theme, e.g. `Soft_007.wav`.
    pub fn file_name(theme_name: &str, seq: u32) -> String {
        format!("{theme_name}_{seq:0width$}.{CLIP_EXTENSION}", width = SEQ_WIDTH)
    }

    /// Parse the sequence number back out of a bank file name.
    pub fn parse_seq(theme_name: &str, path: &Path) -> Option<u32> {
        if path.extension()?.to_str()? != CLIP_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let digits = stem.strip_prefix(theme_name)?.strip_prefix('_')?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Path of the JSON sidecar next to the clip.
    pub fn sidecar_path(&self) -> PathBuf {
        self.path.with_extension("json")
    }
}

/// Metadata written next to every bank entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntryMetadata {
    pub url: String,
    pub media_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub origin_theme: String,
    pub assigned_theme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub slice_index: u32,
    pub slice_offset_secs: f64,
    pub clip_secs: f64,
    pub strategy: FetchStrategy,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}
