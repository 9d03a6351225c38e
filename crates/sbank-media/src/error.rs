//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised by the external tool wrappers.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Search failed: {message}")]
    SearchFailed { message: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid audio file: {0}")]
    InvalidAudio(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a search failure error.
    pub fn search_failed(message: impl Into<String>) -> Self {
        Self::SearchFailed {
            message: message.into(),
        }
    }

    /// Whether the failure is down to a missing binary rather than the media.
    pub fn is_tool_missing(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegNotFound | MediaError::FfprobeNotFound | MediaError::YtDlpNotFound
        )
    }
}

/// Outcome of a failed excerpt fetch.
///
/// Retryable failures (network trouble, timeouts) may succeed on a later
/// attempt; terminal failures (removed, private, region or age restricted,
/// live) never will.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("retryable fetch failure: {0}")]
    Retryable(String),

    #[error("terminal fetch failure: {0}")]
    Terminal(String),
}

impl FetchError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Retryable(_))
    }

    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Retryable(_) => "retryable",
            FetchError::Terminal(_) => "terminal",
        }
    }

    /// Classify a yt-dlp failure from its stderr output.
    pub fn from_stderr(stderr: &str) -> Self {
        let last = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("unknown error")
            .trim()
            .to_string();

        if is_permanent_failure(stderr) {
            Self::Terminal(last)
        } else {
            Self::Retryable(last)
        }
    }
}

impl From<MediaError> for FetchError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Timeout(_) | MediaError::Io(_) => FetchError::Retryable(err.to_string()),
            MediaError::FfmpegFailed { ref stderr, .. } => match stderr {
                Some(s) if is_permanent_failure(s) => FetchError::Terminal(err.to_string()),
                _ => FetchError::Retryable(err.to_string()),
            },
            other => FetchError::Terminal(other.to_string()),
        }
    }
}

/// Whether a tool's error output describes media that can never be fetched.
pub fn is_permanent_failure(output: &str) -> bool {
    let msg = output.to_lowercase();

    if msg.contains("age-restricted")
        || msg.contains("age restricted")
        || msg.contains("confirm your age")
        || msg.contains("inappropriate for some users")
    {
        return true;
    }

    if msg.contains("private video") || msg.contains("video is private") {
        return true;
    }

    if msg.contains("video unavailable")
        || msg.contains("video is unavailable")
        || msg.contains("video not available")
    {
        return true;
    }

    if msg.contains("video has been removed") || msg.contains("video was deleted") {
        return true;
    }

    if msg.contains("copyright") && msg.contains("block") {
        return true;
    }

    if msg.contains("not available in your country") || msg.contains("blocked in your country") {
        return true;
    }

    if msg.contains("live stream") || msg.contains("live event") || msg.contains("is live") {
        return true;
    }

    if msg.contains("premiere") && msg.contains("will begin") {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_terminal_stderr() {
        let err = FetchError::from_stderr(
            "[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Private video. Sign in if you've been granted access\n",
        );
        assert!(matches!(err, FetchError::Terminal(ref m) if m.contains("Private video")));

        assert!(!FetchError::from_stderr("ERROR: Video unavailable").is_retryable());
        assert!(!FetchError::from_stderr("This video is not available in your country").is_retryable());
        assert!(!FetchError::from_stderr("ERROR: This video is age-restricted").is_retryable());
    }

    #[test]
    fn test_classify_retryable_stderr() {
        let err = FetchError::from_stderr("ERROR: unable to download video data: HTTP Error 503");
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "retryable");
    }

    #[test]
    fn test_network_failure_after_page_download_is_retryable() {
        let err = FetchError::from_stderr(
            "[youtube] abc: Downloading webpage\n\
             [youtube] abc: Downloading m3u8 information\n\
             ERROR: [youtube] abc: Unable to download API page: \
             <urlopen error [SSL: CERTIFICATE_VERIFY_FAILED] certificate verify failed>\n",
        );
        assert!(err.is_retryable());

        let err = FetchError::from_stderr(
            "[youtube] abc: Downloading webpage\nERROR: Sign in to confirm your age\n",
        );
        assert!(!err.is_retryable());
        assert!(is_permanent_failure(
            "This video may be inappropriate for some users."
        ));
    }

    #[test]
    fn test_media_error_conversion() {
        assert!(FetchError::from(MediaError::Timeout(30)).is_retryable());
        assert!(!FetchError::from(MediaError::YtDlpNotFound).is_retryable());
        assert!(MediaError::FfprobeNotFound.is_tool_missing());
    }
}
