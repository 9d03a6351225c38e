//! Extra search queries drawn from a words list.
//!
//! When every configured query of a theme runs dry, the orchestrator can
//! append a random word to the theme's first query and keep searching.
//! Words are never reused within a session.

use rand::seq::IndexedRandom;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::EngineError;

/// How many word queries a theme may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordsMode {
    /// A single word query per theme
    #[default]
    OnePerTheme,
    /// A fresh word every time the theme runs dry
    UniquePerQuery,
}

impl WordsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WordsMode::OnePerTheme => "one_per_theme",
            WordsMode::UniquePerQuery => "unique_per_query",
        }
    }
}

impl FromStr for WordsMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one_per_theme" => Ok(WordsMode::OnePerTheme),
            "unique_per_query" => Ok(WordsMode::UniquePerQuery),
            other => Err(EngineError::config(format!("unknown words mode: {other}"))),
        }
    }
}

/// Words-list settings.
#[derive(Debug, Clone)]
pub struct WordsConfig {
    pub path: PathBuf,
    pub mode: WordsMode,
    /// Theme names that never get word queries
    pub opt_out: Vec<String>,
}

impl WordsConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: WordsMode::default(),
            opt_out: Vec::new(),
        }
    }
}

/// Whether `word` is usable as a search term.
pub fn usable_word(word: &str) -> bool {
    word.chars().count() > 2
        && word.chars().all(char::is_alphabetic)
        && !word.chars().all(char::is_uppercase)
}

/// Session-wide pool of unused words.
#[derive(Debug)]
pub struct WordPool {
    words: Vec<String>,
    used: HashSet<String>,
    mode: WordsMode,
    opt_out: HashSet<String>,
}

impl WordPool {
    pub fn new<I, S>(words: I, mode: WordsMode, opt_out: &[String]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| usable_word(w) && seen.insert(w.clone()))
            .collect();
        Self {
            words,
            used: HashSet::new(),
            mode,
            opt_out: opt_out.iter().map(|s| s.trim().to_string()).collect(),
        }
    }

    /// Load the words file. A missing or unusable file disables the feature.
    pub async fn load(config: &WordsConfig) -> Option<Self> {
        let text = match tokio::fs::read_to_string(&config.path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %config.path.display(), "Words list unavailable: {}", e);
                return None;
            }
        };

        let pool = Self::new(text.lines(), config.mode, &config.opt_out);
        if pool.words.is_empty() {
            warn!(path = %config.path.display(), "Words list has no usable words");
            return None;
        }
        info!(
            path = %config.path.display(),
            words = pool.words.len(),
            mode = pool.mode.as_str(),
            "Loaded words list"
        );
        Some(pool)
    }

    /// Whether `theme` may get another word query, given how many it has.
    pub fn allows(&self, theme: &str, word_queries: u32) -> bool {
        if self.opt_out.contains(theme) {
            return false;
        }
        match self.mode {
            WordsMode::OnePerTheme => word_queries == 0,
            WordsMode::UniquePerQuery => true,
        }
    }

    /// A random word not drawn before, or `None` once all are used.
    pub fn draw(&mut self) -> Option<String> {
        let unused: Vec<&String> = self.words.iter().filter(|w| !self.used.contains(*w)).collect();
        let word = unused.choose(&mut rand::rng())?.to_string();
        self.used.insert(word.clone());
        Some(word)
    }

    pub fn remaining(&self) -> usize {
        self.words.len() - self.used.len()
    }
}
