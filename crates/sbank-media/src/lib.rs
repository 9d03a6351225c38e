//! yt-dlp and FFmpeg wrappers for building sample banks.
//!
//! This crate provides:
//! - Catalog search through `yt-dlp --flat-playlist`
//! - Bandwidth-aware excerpt fetching (whole file or centred segment)
//! - FFmpeg command building with a timeout
//! - Fixed-format clip slicing with optional fades and loudness normalisation
//! - Cross-device file moves for placing staged clips

pub mod command;
pub mod error;
pub mod fetch;
pub mod fs_utils;
pub mod probe;
pub mod search;
pub mod slicer;

pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, has_aria2c, FfmpegCommand, FfmpegRunner};
pub use error::{is_permanent_failure, FetchError, MediaError, MediaResult};
pub use fetch::{Aria2Config, AudioQuality, Excerpt, ExcerptFetcher, FetcherConfig, YtDlpFetcher};
pub use fs_utils::{move_file, reset_dir, write_atomic};
pub use probe::{probe_audio, AudioInfo};
pub use search::{SearchSource, YtDlpSearch};
pub use slicer::{discard_candidate, plan_slices, ClipFormat, ClipSlicer, FfmpegSlicer, SlicePlan};
