//! Excerpt fetching through yt-dlp.
//!
//! Short media is fetched whole (optionally through aria2c); long media is
//! fetched as a server-side extracted segment centred on its midpoint. The
//! choice is made by [`sbank_models::select_strategy`].

use async_trait::async_trait;
use sbank_models::{select_strategy, FetchMode, FetchStrategy, MediaRef, SearchResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{check_ytdlp, has_aria2c};
use crate::error::{FetchError, MediaError};
use crate::probe::probe_audio;

/// Base name of the downloaded file inside the excerpt's temp dir.
const EXCERPT_STEM: &str = "excerpt";

/// A fetched audio excerpt.
///
/// The backing temporary directory is removed when the excerpt is dropped.
#[derive(Debug)]
pub struct Excerpt {
    pub path: PathBuf,
    pub media: MediaRef,
    pub strategy: FetchStrategy,
    /// Actual length of the fetched audio, in seconds
    pub duration: f64,
    dir: Option<TempDir>,
}

impl Excerpt {
    pub fn new(path: impl Into<PathBuf>, media: MediaRef, strategy: FetchStrategy, duration: f64) -> Self {
        Self {
            path: path.into(),
            media,
            strategy,
            duration,
            dir: None,
        }
    }

    /// Tie the excerpt to a temp dir that is deleted with it.
    pub fn owning(mut self, dir: TempDir) -> Self {
        self.dir = Some(dir);
        self
    }

    /// Delete the excerpt's files now.
    pub fn discard(self) {
        if self.dir.is_none() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Fetches audio excerpts for search results.
#[async_trait]
pub trait ExcerptFetcher: Send + Sync {
    /// Fetch an excerpt of at most `window` seconds for `result`.
    async fn fetch(&self, result: &SearchResult, window: f64) -> Result<Excerpt, FetchError>;
}

/// Audio format preference handed to yt-dlp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioQuality {
    #[default]
    Best,
    Worst,
}

impl AudioQuality {
    pub fn format_selector(&self) -> &'static str {
        match self {
            AudioQuality::Best => "bestaudio/best",
            AudioQuality::Worst => "worstaudio/worst",
        }
    }
}

impl FromStr for AudioQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" => Ok(AudioQuality::Best),
            "worst" => Ok(AudioQuality::Worst),
            other => Err(format!("unknown audio quality: {other}")),
        }
    }
}

/// aria2c settings used for whole-file fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aria2Config {
    pub conn_per_server: u32,
    pub split: u32,
    pub chunk_size: String,
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            conn_per_server: 4,
            split: 4,
            chunk_size: "10M".to_string(),
        }
    }
}

impl Aria2Config {
    fn downloader_args(&self) -> String {
        format!(
            "aria2c:--min-split-size={} --max-connection-per-server={} --split={} \
             --max-tries=3 --retry-wait=5 --file-allocation=none --allow-overwrite=true \
             --auto-file-renaming=false",
            self.chunk_size, self.conn_per_server, self.split
        )
    }
}

/// Configuration for [`YtDlpFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub mode: FetchMode,
    pub quality: AudioQuality,
    /// `None` disables the parallel-chunk downloader
    pub aria2c: Option<Aria2Config>,
    /// Timeout for one tool invocation
    pub timeout_secs: u64,
    /// Media known to be shorter than this is rejected before download
    pub min_duration: f64,
    /// Directory the per-fetch temp dirs are created in
    pub work_dir: PathBuf,
}

impl FetcherConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: FetchMode::Smart,
            quality: AudioQuality::Best,
            aria2c: Some(Aria2Config::default()),
            timeout_secs: 300,
            min_duration: 0.0,
            work_dir: work_dir.into(),
        }
    }
}

/// [`ExcerptFetcher`] backed by the yt-dlp CLI.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: FetcherConfig,
    aria2c_available: bool,
}

impl YtDlpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let aria2c_available = config.aria2c.is_some() && has_aria2c();
        if config.aria2c.is_some() && !aria2c_available {
            warn!("aria2c enabled but not found in PATH, using the native downloader");
        }
        Self {
            config,
            aria2c_available,
        }
    }

    /// Build yt-dlp arguments for one strategy.
    pub(crate) fn build_args(&self, url: &str, strategy: FetchStrategy, out_dir: &Path) -> Vec<String> {
        let template = out_dir.join(format!("{EXCERPT_STEM}.%(ext)s"));
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "--retries".to_string(),
            "3".to_string(),
            "-f".to_string(),
            self.config.quality.format_selector().to_string(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
        ];

        match strategy {
            FetchStrategy::Segment { start, end } => {
                args.push("--download-sections".to_string());
                args.push(format!("*{:.3}-{:.3}", start, end));
                args.push("--force-keyframes-at-cuts".to_string());
            }
            FetchStrategy::Full => {
                if let (true, Some(aria)) = (self.aria2c_available, &self.config.aria2c) {
                    args.push("--downloader".to_string());
                    args.push("aria2c".to_string());
                    args.push("--downloader-args".to_string());
                    args.push(aria.downloader_args());
                }
            }
        }

        args.push(url.to_string());
        args
    }

    async fn run_ytdlp(&self, args: &[String]) -> Result<std::process::Output, FetchError> {
        check_ytdlp()?;
        debug!("Running yt-dlp {}", args.join(" "));

        let child = Command::new("yt-dlp")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), child)
            .await
            .map_err(|_| FetchError::from(MediaError::Timeout(self.config.timeout_secs)))?
            .map_err(MediaError::from)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            return Err(FetchError::from_stderr(&stderr));
        }

        Ok(output)
    }

    /// Look up duration and live status when search did not report them.
    async fn lookup_metadata(&self, url: &str) -> Result<MediaMetadata, FetchError> {
        let args = vec![
            "--dump-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ];
        let output = self.run_ytdlp(&args).await?;
        serde_json::from_slice::<MediaMetadata>(&output.stdout)
            .map_err(|e| FetchError::terminal(format!("unreadable metadata: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct MediaMetadata {
    duration: Option<f64>,
    is_live: Option<bool>,
    live_status: Option<String>,
}

impl MediaMetadata {
    fn is_live(&self) -> bool {
        self.is_live.unwrap_or(false)
            || matches!(self.live_status.as_deref(), Some("is_live" | "is_upcoming"))
    }
}

#[async_trait]
impl ExcerptFetcher for YtDlpFetcher {
    async fn fetch(&self, result: &SearchResult, window: f64) -> Result<Excerpt, FetchError> {
        let media = &result.media;

        if result.is_live {
            return Err(FetchError::terminal("live stream"));
        }

        let mut duration = result.duration_estimate;
        if duration.is_none() && self.config.mode != FetchMode::Full {
            let meta = self.lookup_metadata(&media.url).await?;
            if meta.is_live() {
                return Err(FetchError::terminal("live stream"));
            }
            duration = meta.duration.filter(|d| d.is_finite() && *d > 0.0);
        }

        if let Some(d) = duration {
            if d < self.config.min_duration {
                return Err(FetchError::terminal(format!(
                    "too short ({d:.1}s < {:.1}s)",
                    self.config.min_duration
                )));
            }
        }

        let strategy = select_strategy(duration, window, self.config.mode);
        info!(
            url = %media.url,
            duration = ?duration,
            strategy = ?strategy,
            "Fetching excerpt"
        );

        let dir = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&self.config.work_dir)
            .map_err(MediaError::from)?;

        let args = self.build_args(&media.url, strategy, dir.path());
        self.run_ytdlp(&args).await?;

        let path = find_excerpt_file(dir.path())
            .ok_or_else(|| FetchError::retryable("yt-dlp produced no output file"))?;

        let actual = probe_audio(&path).await?.duration;

        debug!(
            url = %media.url,
            path = %path.display(),
            seconds = actual,
            "Excerpt fetched"
        );

        Ok(Excerpt::new(path, media.clone(), strategy, actual).owning(dir))
    }
}

fn find_excerpt_file(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.file_stem().and_then(|s| s.to_str()) == Some(EXCERPT_STEM)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(aria: bool) -> YtDlpFetcher {
        let mut config = FetcherConfig::new("/tmp");
        if !aria {
            config.aria2c = None;
        }
        YtDlpFetcher {
            aria2c_available: aria,
            config,
        }
    }

    #[test]
    fn test_segment_args_never_use_aria2c() {
        let args = fetcher(true).build_args(
            "https://youtu.be/x",
            FetchStrategy::Segment { start: 295.0, end: 305.0 },
            Path::new("/tmp/f"),
        );
        assert!(args.contains(&"*295.000-305.000".to_string()));
        assert!(args.contains(&"--force-keyframes-at-cuts".to_string()));
        assert!(!args.iter().any(|a| a.contains("aria2c")));
    }

    #[test]
    fn test_full_args_use_aria2c_when_available() {
        let args = fetcher(true).build_args("https://youtu.be/x", FetchStrategy::Full, Path::new("/tmp/f"));
        let pos = args.iter().position(|a| a == "--downloader").unwrap();
        assert_eq!(args[pos + 1], "aria2c");
        assert!(!args.contains(&"--download-sections".to_string()));

        let args = fetcher(false).build_args("https://youtu.be/x", FetchStrategy::Full, Path::new("/tmp/f"));
        assert!(!args.contains(&"--downloader".to_string()));
    }

    #[test]
    fn test_audio_quality() {
        assert_eq!("worst".parse::<AudioQuality>().unwrap().format_selector(), "worstaudio/worst");
        assert!("medium".parse::<AudioQuality>().is_err());
    }

    #[test]
    fn test_excerpt_dir_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let path = root.join("excerpt.m4a");
        std::fs::write(&path, b"data").unwrap();
        assert_eq!(find_excerpt_file(&root), Some(path.clone()));

        let excerpt = Excerpt::new(&path, MediaRef::new("x", "u"), FetchStrategy::Full, 4.0).owning(dir);
        excerpt.discard();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_live_results_are_terminal() {
        let result = SearchResult {
            media: MediaRef::new("live", "https://youtu.be/live"),
            duration_estimate: None,
            is_live: true,
            theme: sbank_models::ThemeId(0),
        };
        let err = fetcher(false).fetch(&result, 10.0).await.unwrap_err();
        assert_eq!(err, FetchError::terminal("live stream"));
    }
}
