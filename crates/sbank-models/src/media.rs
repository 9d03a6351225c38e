//! Media references and search results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::theme::ThemeId;

/// An opaque reference to an item in the video catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct MediaRef {
    /// Catalog identifier (e.g. a YouTube video id)
    pub id: String,
    /// URL the fetch tools are given
    pub url: String,
    /// Title as reported by the catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl MediaRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Key under which this reference is recorded in the dedup ledger.
    ///
    /// Different URL spellings of the same video share one key.
    pub fn dedup_key(&self) -> String {
        normalize_media_url(&self.url)
    }

    /// Filesystem-friendly stem derived from the catalog id.
    pub fn file_stem(&self) -> String {
        let stem: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(48)
            .collect();
        if stem.is_empty() {
            "media".to_string()
        } else {
            stem
        }
    }
}

/// One search hit, tagged with the theme whose query produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub media: MediaRef,
    /// Catalog-reported duration in seconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_estimate: Option<f64>,
    /// Whether the catalog reports this item as a live broadcast
    #[serde(default)]
    pub is_live: bool,
    pub theme: ThemeId,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    /// Token for the following page; `None` when the source has no more
    pub next: Option<u32>,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Normalise a media URL into a dedup key.
///
/// YouTube URLs in any of the supported spellings (`watch?v=`, `youtu.be/`,
/// `embed/`, `v/`, `shorts/`, with extra query parameters or fragments)
/// collapse to `youtube:<id>`. Other URLs lose their query and fragment and
/// get a lowercase host.
pub fn normalize_media_url(url: &str) -> String {
    let trimmed = url.trim();

    if let Some(id) = extract_youtube_id(trimmed) {
        return format!("youtube:{id}");
    }

    match url::Url::parse(trimmed) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
            let path = parsed.path().trim_end_matches('/');
            format!("{}://{}{}", parsed.scheme(), host, path)
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Extract a YouTube video id from any supported URL form.
fn extract_youtube_id(url: &str) -> Option<String> {
    let lower = url.to_ascii_lowercase();
    if !(lower.contains("youtube.com") || lower.contains("youtu.be")) {
        return None;
    }

    const MARKERS: [&str; 6] = ["?v=", "&v=", "youtu.be/", "/embed/", "/v/", "/shorts/"];
    MARKERS.iter().find_map(|marker| {
        let pos = url.find(marker)?;
        id_from_segment(&url[pos + marker.len()..])
    })
}

/// Take the id up to the next delimiter, rejecting empty or malformed ids.
fn id_from_segment(segment: &str) -> Option<String> {
    let end = segment
        .find(['&', '#', '?', '/'])
        .unwrap_or(segment.len());
    let id = segment[..end].trim();
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_spellings_share_a_key() {
        let urls = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10s",
            "https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ",
            "https://youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ?feature=share",
        ];
        for url in urls {
            assert_eq!(normalize_media_url(url), "youtube:dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn test_other_urls_drop_query_and_lowercase_host() {
        assert_eq!(
            normalize_media_url("https://Vimeo.COM/12345/?autoplay=1#t=3"),
            "https://vimeo.com/12345"
        );
        assert_eq!(normalize_media_url("  not a url "), "not a url");
    }

    #[test]
    fn test_file_stem_is_sanitised() {
        let media = MediaRef::new("ab/c d", "https://example.com/x");
        assert_eq!(media.file_stem(), "ab_c_d");
        assert_eq!(MediaRef::new("", "u").file_stem(), "media");
    }
}
