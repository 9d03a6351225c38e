//! Catalog search through yt-dlp.

use async_trait::async_trait;
use sbank_models::{MediaRef, SearchPage, SearchResult, ThemeId};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};

/// A source of ordered search results, paged.
///
/// An empty page means the source has nothing more for the query.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Fetch one page of results for `query`, tagging each hit with `theme`.
    async fn search(&self, theme: ThemeId, query: &str, page: Option<u32>) -> MediaResult<SearchPage>;
}

/// Flat-playlist search via `yt-dlp ytsearchN:<query>`.
#[derive(Debug, Clone)]
pub struct YtDlpSearch {
    page_size: u32,
    timeout_secs: u64,
}

impl YtDlpSearch {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            timeout_secs: 60,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn build_args(&self, query: &str, page: u32) -> Vec<String> {
        let start = page * self.page_size + 1;
        let end = (page + 1) * self.page_size;
        vec![
            "--flat-playlist".to_string(),
            "--dump-json".to_string(),
            "--no-warnings".to_string(),
            "--ignore-errors".to_string(),
            "--playlist-start".to_string(),
            start.to_string(),
            "--playlist-end".to_string(),
            end.to_string(),
            format!("ytsearch{end}:{query}"),
        ]
    }
}

#[async_trait]
impl SearchSource for YtDlpSearch {
    async fn search(&self, theme: ThemeId, query: &str, page: Option<u32>) -> MediaResult<SearchPage> {
        check_ytdlp()?;

        let page = page.unwrap_or(0);
        let args = self.build_args(query, page);
        debug!("Running search: yt-dlp {}", args.join(" "));

        let child = Command::new("yt-dlp")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), child)
            .await
            .map_err(|_| MediaError::Timeout(self.timeout_secs))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let results = parse_search_output(&stdout, theme);

        // --ignore-errors still exits non-zero when single entries fail
        if !output.status.success() && results.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::search_failed(
                stderr.lines().last().unwrap_or("yt-dlp search failed").to_string(),
            ));
        }

        info!(
            query = %query,
            page = page,
            count = results.len(),
            "Search page fetched"
        );

        let next = (results.len() as u32 >= self.page_size).then_some(page + 1);
        Ok(SearchPage { results, next })
    }
}

/// One line of `--flat-playlist --dump-json` output.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    live_status: Option<String>,
    is_live: Option<bool>,
}

impl FlatEntry {
    fn into_result(self, theme: ThemeId) -> Option<SearchResult> {
        let id = self.id.filter(|s| !s.is_empty())?;
        let url = self
            .webpage_url
            .or(self.url)
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));

        let is_live = self.is_live.unwrap_or(false)
            || matches!(self.live_status.as_deref(), Some("is_live" | "is_upcoming"));

        let mut media = MediaRef::new(id, url);
        media.title = self.title;

        Some(SearchResult {
            media,
            duration_estimate: self.duration.filter(|d| d.is_finite() && *d > 0.0),
            is_live,
            theme,
        })
    }
}

fn parse_search_output(stdout: &str, theme: ThemeId) -> Vec<SearchResult> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => entry.into_result(theme),
            Err(e) => {
                debug!("Skipping unparseable search line: {}", e);
                None
            }
        })
        .collect()
}
