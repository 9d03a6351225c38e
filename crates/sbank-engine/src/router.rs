//! Candidate routing.
//!
//! A router decides which bank a candidate belongs in. Two implementations
//! exist and one is picked at run start: [`RuleRouter`] keeps every
//! candidate in its origin bank, [`ScoredRouter`] sends it to the theme
//! whose prompt the audio matches best.

use async_trait::async_trait;
use sbank_models::{Candidate, Theme, ThemeId};
use sbank_scoring::{ScoringClient, ScoringResult};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Scores closer than this are treated as equal.
const SCORE_EPSILON: f64 = 1e-9;

/// Audio/text similarity capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Whether the service is up and has its model loaded.
    async fn health_check(&self) -> ScoringResult<bool>;

    /// One score per prompt, in prompt order.
    async fn score_all(&self, audio: &Path, prompts: &[String]) -> ScoringResult<Vec<f64>>;
}

#[async_trait]
impl Scorer for ScoringClient {
    async fn health_check(&self) -> ScoringResult<bool> {
        ScoringClient::health_check(self).await
    }

    async fn score_all(&self, audio: &Path, prompts: &[String]) -> ScoringResult<Vec<f64>> {
        ScoringClient::score_all(self, audio, prompts).await
    }
}

/// Why a candidate was not placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Best score under the configured minimum similarity
    BelowThreshold,
    /// The assigned bank reached its target first
    ThemeFull,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::BelowThreshold => "below_threshold",
            RejectReason::ThemeFull => "theme_full",
        }
    }
}

/// Routing decision for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    Assigned { theme: ThemeId, score: Option<f64> },
    Rejected(RejectReason),
}

/// How to choose among themes sharing the best score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The origin theme wins if it is among the best, else configuration order
    #[default]
    PreferOrigin,
    /// Earliest theme in configuration order
    ConfigOrder,
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::PreferOrigin => f.write_str("origin"),
            TieBreak::ConfigOrder => f.write_str("order"),
        }
    }
}

impl FromStr for TieBreak {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "origin" | "prefer_origin" => Ok(TieBreak::PreferOrigin),
            "order" | "config_order" => Ok(TieBreak::ConfigOrder),
            other => Err(EngineError::config(format!("unknown tie-break policy: {other}"))),
        }
    }
}

#[async_trait]
pub trait Router: Send + Sync {
    /// Decide where `candidate` goes. May record scores on the candidate.
    async fn route(&self, candidate: &mut Candidate, themes: &[Theme]) -> EngineResult<Routing>;
}

/// Assigns every candidate to the theme whose search produced it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleRouter;

#[async_trait]
impl Router for RuleRouter {
    async fn route(&self, candidate: &mut Candidate, _themes: &[Theme]) -> EngineResult<Routing> {
        Ok(Routing::Assigned {
            theme: candidate.origin,
            score: None,
        })
    }
}

/// Assigns candidates by audio/text similarity across all themes.
pub struct ScoredRouter {
    scorer: Arc<dyn Scorer>,
    tie_break: TieBreak,
    min_similarity: Option<f64>,
}

impl ScoredRouter {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self {
            scorer,
            tie_break: TieBreak::default(),
            min_similarity: None,
        }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: Option<f64>) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    fn pick(&self, scores: &[f64], origin: ThemeId) -> Option<(ThemeId, f64)> {
        let best = scores
            .iter()
            .copied()
            .filter(|s| !s.is_nan())
            .fold(f64::NEG_INFINITY, f64::max);
        if best == f64::NEG_INFINITY {
            return None;
        }

        let mut maximal = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| (best - **s).abs() <= SCORE_EPSILON)
            .map(|(i, _)| ThemeId(i));

        let chosen = match self.tie_break {
            TieBreak::PreferOrigin if scores
                .get(origin.index())
                .is_some_and(|s| (best - s).abs() <= SCORE_EPSILON) =>
            {
                origin
            }
            _ => maximal.next()?,
        };
        Some((chosen, best))
    }
}

#[async_trait]
impl Router for ScoredRouter {
    async fn route(&self, candidate: &mut Candidate, themes: &[Theme]) -> EngineResult<Routing> {
        let prompts: Vec<String> = themes.iter().map(|t| t.scoring_text().to_string()).collect();

        let scores = self
            .scorer
            .score_all(&candidate.path, &prompts)
            .await
            .map_err(|e| EngineError::scoring_unavailable(e.to_string()))?;

        if scores.len() != themes.len() {
            return Err(EngineError::scoring_unavailable(format!(
                "expected {} scores, got {}",
                themes.len(),
                scores.len()
            )));
        }

        let (theme, best) = self.pick(&scores, candidate.origin).ok_or_else(|| {
            EngineError::scoring_unavailable("scoring service returned no usable scores")
        })?;
        candidate.scores = Some(scores);

        if let Some(min) = self.min_similarity {
            if best < min {
                debug!(
                    media = %candidate.media.id,
                    score = best,
                    min_similarity = min,
                    "Candidate below minimum similarity"
                );
                return Ok(Routing::Rejected(RejectReason::BelowThreshold));
            }
        }

        debug!(
            media = %candidate.media.id,
            origin = %candidate.origin,
            assigned = %theme,
            score = best,
            "Candidate routed"
        );
        Ok(Routing::Assigned {
            theme,
            score: Some(best),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbank_models::{parse_themes, FetchStrategy, MediaRef, ThemeSpec};
    use sbank_scoring::ScoringError;

    fn themes() -> Vec<Theme> {
        let spec = |name: &str, prompt: Option<&str>| ThemeSpec {
            name: name.to_string(),
            search: name.to_lowercase(),
            prompt: prompt.map(str::to_string),
            target: None,
        };
        parse_themes(
            vec![spec("A", Some("bright bell")), spec("B", None), spec("C", None)],
            2,
        )
        .unwrap()
    }

    fn candidate(origin: usize) -> Candidate {
        Candidate {
            path: "/tmp/staging/x.wav".into(),
            media: MediaRef::new("x", "https://youtu.be/x"),
            origin: ThemeId(origin),
            slice_index: 0,
            offset_secs: 0.0,
            duration_secs: 2.0,
            strategy: FetchStrategy::Full,
            scores: None,
        }
    }

    fn scorer_returning(scores: Vec<f64>) -> Arc<dyn Scorer> {
        let mut mock = MockScorer::new();
        mock.expect_score_all()
            .times(1)
            .returning(move |_, _| Ok(scores.clone()));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_rule_router_keeps_origin() {
        let mut c = candidate(1);
        let routing = RuleRouter.route(&mut c, &themes()).await.unwrap();
        assert_eq!(
            routing,
            Routing::Assigned {
                theme: ThemeId(1),
                score: None
            }
        );
        assert!(c.scores.is_none());
    }

    #[tokio::test]
    async fn test_highest_score_wins_over_origin() {
        let router = ScoredRouter::new(scorer_returning(vec![0.8, 0.6, 0.1]));
        let mut c = candidate(1);
        let routing = router.route(&mut c, &themes()).await.unwrap();
        assert_eq!(
            routing,
            Routing::Assigned {
                theme: ThemeId(0),
                score: Some(0.8)
            }
        );
        assert_eq!(c.score_for(ThemeId(1)), Some(0.6));
    }

    #[tokio::test]
    async fn test_prompts_fall_back_to_search() {
        let mut mock = MockScorer::new();
        mock.expect_score_all()
            .withf(|_, prompts: &[String]| prompts == ["bright bell", "b", "c"])
            .returning(|_, _| Ok(vec![0.1, 0.2, 0.3]));
        let router = ScoredRouter::new(Arc::new(mock));
        let routing = router.route(&mut candidate(0), &themes()).await.unwrap();
        assert!(matches!(routing, Routing::Assigned { theme: ThemeId(2), .. }));
    }

    #[tokio::test]
    async fn test_tie_prefers_origin() {
        let router = ScoredRouter::new(scorer_returning(vec![0.7, 0.2, 0.7]));
        let routing = router.route(&mut candidate(2), &themes()).await.unwrap();
        assert!(matches!(routing, Routing::Assigned { theme: ThemeId(2), .. }));
    }

    #[tokio::test]
    async fn test_tie_without_origin_uses_config_order() {
        let router = ScoredRouter::new(scorer_returning(vec![0.2, 0.7, 0.7]));
        let routing = router.route(&mut candidate(0), &themes()).await.unwrap();
        assert!(matches!(routing, Routing::Assigned { theme: ThemeId(1), .. }));
    }

    #[tokio::test]
    async fn test_config_order_policy_ignores_origin() {
        let router = ScoredRouter::new(scorer_returning(vec![0.7, 0.2, 0.7]))
            .with_tie_break(TieBreak::ConfigOrder);
        let routing = router.route(&mut candidate(2), &themes()).await.unwrap();
        assert!(matches!(routing, Routing::Assigned { theme: ThemeId(0), .. }));
    }

    #[tokio::test]
    async fn test_below_min_similarity_is_rejected() {
        let router =
            ScoredRouter::new(scorer_returning(vec![0.1, 0.15, 0.05])).with_min_similarity(Some(0.2));
        let routing = router.route(&mut candidate(0), &themes()).await.unwrap();
        assert_eq!(routing, Routing::Rejected(RejectReason::BelowThreshold));
    }

    #[tokio::test]
    async fn test_scoring_failure_is_unavailable() {
        let mut mock = MockScorer::new();
        mock.expect_score_all()
            .returning(|_, _| Err(ScoringError::ServiceUnavailable("503".to_string())));
        let router = ScoredRouter::new(Arc::new(mock));
        let err = router.route(&mut candidate(0), &themes()).await.unwrap_err();
        assert!(matches!(err, EngineError::ScoringUnavailable(_)));
    }

    #[tokio::test]
    async fn test_wrong_score_count_is_unavailable() {
        let router = ScoredRouter::new(scorer_returning(vec![0.5]));
        let err = router.route(&mut candidate(0), &themes()).await.unwrap_err();
        assert!(err.is_collaborator_unavailable());
    }

    #[test]
    fn test_tie_break_parsing() {
        assert_eq!("origin".parse::<TieBreak>().unwrap(), TieBreak::PreferOrigin);
        assert_eq!("ORDER".parse::<TieBreak>().unwrap(), TieBreak::ConfigOrder);
        assert!("random".parse::<TieBreak>().is_err());
    }
}
