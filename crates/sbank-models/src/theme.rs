//! Theme definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use validator::Validate;

use crate::error::{ModelError, ModelResult};

/// Position of a theme in configuration order.
///
/// Configuration order is meaningful: it is the fallback tie-break when
/// scored routing finds several equally good themes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ThemeId(pub usize);

impl ThemeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ThemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A theme as written in the themes file.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct ThemeSpec {
    /// Bank name, also used as the output folder and file prefix
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    /// Search query; commas separate several queries
    #[serde(alias = "query")]
    #[validate(length(min = 1))]
    pub search: String,

    /// Free-text prompt for similarity scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Target sample count (falls back to the global default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub target: Option<u32>,
}

/// A resolved theme, ready for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Theme {
    pub id: ThemeId,
    pub name: String,
    /// Individual search queries, in the order they are paged
    pub queries: Vec<String>,
    /// The search string exactly as configured
    pub search: String,
    pub prompt: Option<String>,
    pub target: u32,
}

impl Theme {
    /// Text the scorer compares audio against.
    ///
    /// Uses the prompt when one is configured, otherwise the search string.
    pub fn scoring_text(&self) -> &str {
        match self.prompt.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => &self.search,
        }
    }

    fn from_spec(id: ThemeId, spec: ThemeSpec, default_target: u32) -> ModelResult<Self> {
        spec.validate()
            .map_err(|e| ModelError::invalid_theme(format!("{}: {}", spec.name, e)))?;

        let name = spec.name.trim().to_string();
        if !is_safe_folder_name(&name) {
            return Err(ModelError::invalid_theme(format!(
                "{name:?} cannot be used as a folder name"
            )));
        }

        let queries = split_queries(&spec.search);
        if queries.is_empty() {
            return Err(ModelError::invalid_theme(format!("{name}: empty search")));
        }

        Ok(Self {
            id,
            name,
            queries,
            search: spec.search.trim().to_string(),
            prompt: spec.prompt.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            target: spec.target.unwrap_or(default_target),
        })
    }
}

/// Split a comma-separated search string into individual queries.
fn split_queries(search: &str) -> Vec<String> {
    search
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_safe_folder_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Resolve raw specs into themes, assigning ids in configuration order.
pub fn parse_themes(specs: Vec<ThemeSpec>, default_target: u32) -> ModelResult<Vec<Theme>> {
    if specs.is_empty() {
        return Err(ModelError::invalid_theme("no themes configured"));
    }

    let mut seen = HashSet::new();
    let mut themes = Vec::with_capacity(specs.len());

    for (idx, spec) in specs.into_iter().enumerate() {
        let theme = Theme::from_spec(ThemeId(idx), spec, default_target)?;
        if !seen.insert(theme.name.to_lowercase()) {
            return Err(ModelError::DuplicateTheme(theme.name));
        }
        themes.push(theme);
    }

    Ok(themes)
}

/// Load themes from a JSON file: `[{"name", "search", "prompt"?, "target"?}]`.
pub fn load_themes(path: impl AsRef<Path>, default_target: u32) -> ModelResult<Vec<Theme>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ModelError::ThemesNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    let specs: Vec<ThemeSpec> = serde_json::from_str(&raw)?;
    parse_themes(specs, default_target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, search: &str) -> ThemeSpec {
        ThemeSpec {
            name: name.to_string(),
            search: search.to_string(),
            prompt: None,
            target: None,
        }
    }

    #[test]
    fn test_parse_assigns_ids_in_order() {
        let themes = parse_themes(vec![spec("Soft", "soft"), spec("Loud", "loud")], 24).unwrap();
        assert_eq!(themes[0].id, ThemeId(0));
        assert_eq!(themes[1].id, ThemeId(1));
        assert_eq!(themes[1].target, 24);
    }

    #[test]
    fn test_comma_separated_queries() {
        let themes = parse_themes(vec![spec("Metal", "clang, chime ,, anvil")], 8).unwrap();
        assert_eq!(themes[0].queries, vec!["clang", "chime", "anvil"]);
    }

    #[test]
    fn test_scoring_text_falls_back_to_search() {
        let mut s = spec("Airy", "wind noise");
        let themes = parse_themes(vec![s.clone()], 4).unwrap();
        assert_eq!(themes[0].scoring_text(), "wind noise");

        s.prompt = Some("Breath and light shimmer".to_string());
        let themes = parse_themes(vec![s], 4).unwrap();
        assert_eq!(themes[0].scoring_text(), "Breath and light shimmer");
    }

    #[test]
    fn test_rejects_duplicates_and_bad_names() {
        let dup = parse_themes(vec![spec("Dark", "a"), spec("dark", "b")], 4);
        assert!(matches!(dup, Err(ModelError::DuplicateTheme(_))));

        let bad = parse_themes(vec![spec("../up", "a")], 4);
        assert!(matches!(bad, Err(ModelError::InvalidTheme(_))));

        let zero = parse_themes(
            vec![ThemeSpec {
                target: Some(0),
                ..spec("Zero", "z")
            }],
            4,
        );
        assert!(zero.is_err());
    }

    #[test]
    fn test_load_themes_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("themes.json");
        std::fs::write(
            &path,
            r#"[{"name":"Woody","query":"wood knock","target":3},{"name":"Eerie","search":"drone","prompt":"Unsettling ambience"}]"#,
        )
        .unwrap();

        let themes = load_themes(&path, 16).unwrap();
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[0].target, 3);
        assert_eq!(themes[1].target, 16);
        assert_eq!(themes[1].scoring_text(), "Unsettling ambience");
    }
}
