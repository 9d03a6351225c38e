//! Run configuration.

use sbank_media::{Aria2Config, AudioQuality, ClipFormat, FetcherConfig, SlicePlan};
use sbank_models::{load_themes, FetchMode, Theme};
use sbank_scoring::ScoringClientConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::router::TieBreak;
use crate::words::{WordsConfig, WordsMode};

/// Upper bound on the worker pool width.
pub const MAX_WORKERS: usize = 16;

/// Configuration for one fill run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Themes in configuration order
    pub themes: Vec<Theme>,
    /// Root of all sessions
    pub output_dir: PathBuf,
    /// Session to resume or create; `None` starts a fresh one
    pub session_id: Option<String>,
    /// Exact clip length in seconds
    pub clip_secs: f64,
    /// Default target for themes that do not set one
    pub samples_per_bank: u32,
    /// Misses allowed per theme; 0 means unlimited
    pub retry_budget: u32,
    /// Search page size
    pub search_results_per_theme: u32,
    /// Worker pool width
    pub workers: usize,
    /// Clips cut from each excerpt
    pub slices_per_ref: u32,
    /// Distance between clip starts
    pub slice_stride: f64,
    /// Excerpt length for segment fetches, also the smart-mode threshold
    pub window_secs: f64,
    pub fetch_mode: FetchMode,
    pub audio_quality: AudioQuality,
    /// `None` disables aria2c for whole-file fetches
    pub aria2c: Option<Aria2Config>,
    pub fetch_timeout_secs: u64,
    /// Retries for retryable fetch errors
    pub fetch_retries: u32,
    /// Retries for a failed search page
    pub search_retries: u32,
    pub clip_format: ClipFormat,
    pub scoring_enabled: bool,
    pub scoring_url: String,
    pub scoring_timeout_secs: u64,
    /// Best score below this rejects the candidate
    pub min_similarity: Option<f64>,
    pub tie_break: TieBreak,
    /// `None` disables words-list queries
    pub words: Option<WordsConfig>,
}

impl EngineConfig {
    /// Config with default settings for the given themes.
    pub fn new(themes: Vec<Theme>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            themes,
            output_dir: output_dir.into(),
            session_id: None,
            clip_secs: 2.0,
            samples_per_bank: 24,
            retry_budget: 0,
            search_results_per_theme: 32,
            workers: 4,
            slices_per_ref: 1,
            slice_stride: 2.0,
            window_secs: 10.0,
            fetch_mode: FetchMode::Smart,
            audio_quality: AudioQuality::Best,
            aria2c: Some(Aria2Config::default()),
            fetch_timeout_secs: 300,
            fetch_retries: 1,
            search_retries: 2,
            clip_format: ClipFormat::default(),
            scoring_enabled: false,
            scoring_url: "http://localhost:8002".to_string(),
            scoring_timeout_secs: 60,
            min_similarity: None,
            tie_break: TieBreak::default(),
            words: None,
        }
    }

    /// Create config from environment variables and the themes file.
    pub fn from_env() -> EngineResult<Self> {
        let samples_per_bank = env_parse("SAMPLES_PER_BANK", 24u32);
        let themes_path = std::env::var("THEMES_PATH").unwrap_or_else(|_| "themes.json".to_string());
        let themes = load_themes(&themes_path, samples_per_bank)?;

        let clip_secs = env_parse("CLIP_SECONDS", 2.0f64);

        let fetch_mode = match std::env::var("DOWNLOAD_METHOD") {
            Ok(s) if !s.trim().is_empty() => FetchMode::from_str(&s)?,
            _ => FetchMode::Smart,
        };
        let audio_quality = match std::env::var("AUDIO_QUALITY") {
            Ok(s) if !s.trim().is_empty() => AudioQuality::from_str(&s).map_err(EngineError::config)?,
            _ => AudioQuality::Best,
        };
        let tie_break = match std::env::var("SCORING_TIE_BREAK") {
            Ok(s) if !s.trim().is_empty() => TieBreak::from_str(&s)?,
            _ => TieBreak::default(),
        };

        let aria2c = env_flag("ARIA2C_ENABLED", true).then(|| {
            let defaults = Aria2Config::default();
            Aria2Config {
                conn_per_server: env_parse("ARIA2C_CONN_PER_SERVER", defaults.conn_per_server),
                split: env_parse("ARIA2C_SPLIT", defaults.split),
                chunk_size: std::env::var("ARIA2C_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            }
        });

        let format_defaults = ClipFormat::default();
        let clip_format = ClipFormat {
            sample_rate: env_parse("CLIP_SAMPLE_RATE", format_defaults.sample_rate),
            channels: env_parse("CLIP_CHANNELS", format_defaults.channels),
            fade: env_flag("CLIP_FADE", format_defaults.fade),
        };

        let min_similarity = match std::env::var("SCORING_MIN_SIMILARITY") {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().parse::<f64>().map_err(|e| {
                EngineError::config(format!("SCORING_MIN_SIMILARITY {s:?}: {e}"))
            })?),
            _ => None,
        };

        let words = if env_flag("USE_WORDS_LIST", false) {
            let mode = match std::env::var("WORDS_MODE") {
                Ok(s) if !s.trim().is_empty() => WordsMode::from_str(&s)?,
                _ => WordsMode::default(),
            };
            let path = std::env::var("WORDS_PATH").unwrap_or_else(|_| "words.txt".to_string());
            Some(WordsConfig {
                mode,
                opt_out: std::env::var("THEME_WORDS_OPT_OUT")
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
                ..WordsConfig::new(path)
            })
        } else {
            None
        };

        Ok(Self {
            themes,
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("wavs/sessions")),
            session_id: std::env::var("SESSION_ID")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            clip_secs,
            samples_per_bank,
            retry_budget: env_parse("MAX_RETRIES_PER_THEME", 0),
            search_results_per_theme: env_parse("SEARCH_RESULTS_PER_THEME", 32),
            workers: env_parse("DOWNLOAD_WORKERS", 4),
            slices_per_ref: env_parse("SLICES_PER_VIDEO", 1),
            slice_stride: env_parse("SLICE_STRIDE_SECONDS", clip_secs),
            window_secs: env_parse("DOWNLOAD_CHUNK_SECONDS", 10.0),
            fetch_mode,
            audio_quality,
            aria2c,
            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS", 300),
            fetch_retries: env_parse("FETCH_RETRIES", 1),
            search_retries: env_parse("SEARCH_RETRIES", 2),
            clip_format,
            scoring_enabled: env_flag("SCORING_ENABLED", false),
            scoring_url: std::env::var("SCORING_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            scoring_timeout_secs: env_parse("SCORING_TIMEOUT_SECS", 60),
            min_similarity,
            tie_break,
            words,
        })
    }

    /// Reject settings the run cannot honour.
    pub fn validate(&self) -> EngineResult<()> {
        if self.themes.is_empty() {
            return Err(EngineError::config("no themes configured"));
        }
        if !(self.clip_secs.is_finite() && self.clip_secs > 0.0) {
            return Err(EngineError::config(format!(
                "clip length must be positive, got {}",
                self.clip_secs
            )));
        }
        if self.window_secs.is_nan() || self.window_secs < self.clip_secs {
            return Err(EngineError::config(format!(
                "download window ({}s) is shorter than a clip ({}s)",
                self.window_secs, self.clip_secs
            )));
        }
        if !(self.slice_stride.is_finite() && self.slice_stride > 0.0) {
            return Err(EngineError::config("slice stride must be positive"));
        }
        if self.slices_per_ref == 0 {
            return Err(EngineError::config("at least one slice per reference is required"));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(EngineError::config(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.search_results_per_theme == 0 {
            return Err(EngineError::config("search page size must be at least 1"));
        }
        if self.scoring_enabled && self.scoring_url.trim().is_empty() {
            return Err(EngineError::config("scoring enabled without a scoring URL"));
        }
        if let Some(min) = self.min_similarity {
            if !min.is_finite() {
                return Err(EngineError::config("minimum similarity must be finite"));
            }
        }
        Ok(())
    }

    pub fn slice_plan(&self) -> SlicePlan {
        SlicePlan {
            clip_secs: self.clip_secs,
            count: self.slices_per_ref,
            stride: self.slice_stride,
        }
    }

    /// Fetcher settings, with per-fetch temp dirs under `work_dir`.
    pub fn fetcher_config(&self, work_dir: &Path) -> FetcherConfig {
        FetcherConfig {
            mode: self.fetch_mode,
            quality: self.audio_quality,
            aria2c: self.aria2c.clone(),
            timeout_secs: self.fetch_timeout_secs,
            min_duration: self.clip_secs,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Scoring client settings; retry knobs still come from the environment.
    pub fn scoring_config(&self) -> ScoringClientConfig {
        ScoringClientConfig {
            timeout: Duration::from_secs(self.scoring_timeout_secs),
            ..ScoringClientConfig::from_env().with_base_url(&self.scoring_url)
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbank_models::{parse_themes, ThemeSpec};
    use tokio_test::{assert_err, assert_ok};

    fn config() -> EngineConfig {
        let themes = parse_themes(
            vec![ThemeSpec {
                name: "Soft".to_string(),
                search: "soft".to_string(),
                prompt: None,
                target: None,
            }],
            4,
        )
        .unwrap();
        EngineConfig::new(themes, "/tmp/sbank")
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_ok!(config().validate());
    }

    #[test]
    fn test_window_shorter_than_clip_is_rejected() {
        let mut c = config();
        c.window_secs = 1.0;
        assert!(matches!(c.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_worker_bounds() {
        let mut c = config();
        c.workers = 0;
        assert_err!(c.validate());
        c.workers = MAX_WORKERS + 1;
        assert_err!(c.validate());
        c.workers = MAX_WORKERS;
        assert_ok!(c.validate());
    }

    #[test]
    fn test_stride_and_slices() {
        let mut c = config();
        c.slice_stride = 0.0;
        assert!(c.validate().is_err());
        c.slice_stride = 1.0;
        c.slices_per_ref = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_scoring_requires_url() {
        let mut c = config();
        c.scoring_enabled = true;
        c.scoring_url = " ".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_slice_plan_and_fetcher_config() {
        let mut c = config();
        c.slices_per_ref = 3;
        c.slice_stride = 1.0;
        let plan = c.slice_plan();
        assert_eq!(plan.offsets(6.0), vec![0.0, 1.0, 2.0]);

        let fetch = c.fetcher_config(Path::new("/tmp/work"));
        assert_eq!(fetch.min_duration, 2.0);
        assert_eq!(fetch.mode, FetchMode::Smart);
    }
}
