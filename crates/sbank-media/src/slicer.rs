//! Cutting excerpts into fixed-length clips.

use async_trait::async_trait;
use sbank_models::clip::CLIP_EXTENSION;
use sbank_models::{Candidate, ThemeId};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::fetch::Excerpt;

/// Tolerance for float rounding when testing whether a slice fits.
const FIT_EPSILON: f64 = 1e-6;

/// How many clips to cut from an excerpt and where.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicePlan {
    /// Exact length of every clip, in seconds
    pub clip_secs: f64,
    /// Maximum number of clips per excerpt
    pub count: u32,
    /// Distance between clip starts, in seconds
    pub stride: f64,
}

impl SlicePlan {
    /// Offsets of the clips that fit in an excerpt of `excerpt_secs`.
    pub fn offsets(&self, excerpt_secs: f64) -> Vec<f64> {
        plan_slices(excerpt_secs, self.clip_secs, self.count, self.stride)
    }
}

/// Start offsets for up to `count` clips of `clip` seconds, `stride` apart.
///
/// A clip that would run past the end of the excerpt is skipped; clips are
/// never shortened.
pub fn plan_slices(excerpt_secs: f64, clip: f64, count: u32, stride: f64) -> Vec<f64> {
    (0..count)
        .map(|i| f64::from(i) * stride)
        .filter(|offset| offset + clip <= excerpt_secs + FIT_EPSILON)
        .collect()
}

/// Cuts an excerpt into candidates waiting in the staging area.
#[async_trait]
pub trait ClipSlicer: Send + Sync {
    /// Slice `excerpt` per `plan` into `out_dir`. Candidates come back in
    /// offset order.
    async fn slice(
        &self,
        excerpt: &Excerpt,
        origin: ThemeId,
        plan: &SlicePlan,
        out_dir: &Path,
    ) -> MediaResult<Vec<Candidate>>;
}

/// Output format and post-processing for clips.
#[derive(Debug, Clone)]
pub struct ClipFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Quarter-clip fades plus loudness normalisation
    pub fade: bool,
}

impl Default for ClipFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            fade: true,
        }
    }
}

impl ClipFormat {
    /// Audio filter chain for a clip of `clip_secs`, if any.
    pub fn filter_chain(&self, clip_secs: f64) -> Option<String> {
        if !self.fade {
            return None;
        }
        let fade = clip_secs / 4.0;
        Some(format!(
            "afade=t=in:st=0:d={fade:.3},afade=t=out:st={:.3}:d={fade:.3},loudnorm",
            clip_secs - fade
        ))
    }
}

/// [`ClipSlicer`] that re-encodes each clip with FFmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegSlicer {
    format: ClipFormat,
    runner: FfmpegRunner,
}

impl FfmpegSlicer {
    pub fn new(format: ClipFormat) -> Self {
        Self {
            format,
            runner: FfmpegRunner::new().with_timeout(120),
        }
    }

    pub fn build_command(&self, excerpt: &Excerpt, offset: f64, clip_secs: f64, output: PathBuf) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&excerpt.path, output)
            .seek(offset)
            .duration(clip_secs)
            .no_video();
        if let Some(filter) = self.format.filter_chain(clip_secs) {
            cmd = cmd.audio_filter(filter);
        }
        cmd.sample_rate(self.format.sample_rate)
            .channels(self.format.channels)
            .audio_codec("pcm_s16le")
    }
}

#[async_trait]
impl ClipSlicer for FfmpegSlicer {
    async fn slice(
        &self,
        excerpt: &Excerpt,
        origin: ThemeId,
        plan: &SlicePlan,
        out_dir: &Path,
    ) -> MediaResult<Vec<Candidate>> {
        let offsets = plan.offsets(excerpt.duration);
        if offsets.is_empty() {
            debug!(
                url = %excerpt.media.url,
                excerpt_secs = excerpt.duration,
                clip_secs = plan.clip_secs,
                "Excerpt too short for a single clip"
            );
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(out_dir).await?;

        let run_tag = uuid::Uuid::new_v4().simple().to_string();
        let stem = excerpt.media.file_stem();
        let mut candidates = Vec::with_capacity(offsets.len());

        for (idx, offset) in offsets.into_iter().enumerate() {
            let output = out_dir.join(format!(
                "{stem}_{idx}_{}.{CLIP_EXTENSION}",
                &run_tag[..8]
            ));
            let cmd = self.build_command(excerpt, offset, plan.clip_secs, output.clone());

            if let Err(e) = self.runner.run(&cmd).await {
                warn!(url = %excerpt.media.url, slice = idx, "Slicing failed: {}", e);
                for c in &candidates {
                    discard_candidate(c).await;
                }
                let _ = tokio::fs::remove_file(&output).await;
                return Err(e);
            }

            candidates.push(Candidate {
                path: output,
                media: excerpt.media.clone(),
                origin,
                slice_index: idx as u32,
                offset_secs: offset,
                duration_secs: plan.clip_secs,
                strategy: excerpt.strategy,
                scores: None,
            });
        }

        Ok(candidates)
    }
}

/// Delete a staged candidate that will not be placed.
pub async fn discard_candidate(candidate: &Candidate) {
    if let Err(e) = tokio::fs::remove_file(&candidate.path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %candidate.path.display(), "Failed to discard candidate: {}", e);
        }
    }
}
