//! Fill-to-quota loop.
//!
//! Each iteration pulls search results for every unfinished theme, reserves
//! a batch of unseen references in the ledger, runs fetch, slice and route
//! for the batch on the worker pool, and applies the outcomes to the
//! tracker one at a time in dispatch order.

use futures::future::join_all;
use sbank_media::{discard_candidate, ClipSlicer, ExcerptFetcher, FetchError, MediaError, SearchSource, SlicePlan};
use sbank_models::{Candidate, RunState, RunStatus, SearchResult, Theme, ThemeId};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::DedupLedger;
use crate::logging::RunLogger;
use crate::metrics;
use crate::retry::{retry_async_if, FailureTracker, RetryConfig};
use crate::router::{RejectReason, Router, Routing, Scorer};
use crate::session::Session;
use crate::tracker::BankTracker;
use crate::words::WordPool;

/// Consecutive misses logged at warn before switching to debug.
const MAX_LOGGED_MISSES: u32 = 8;

/// One search query of a theme and its paging position.
#[derive(Debug)]
struct QueryCursor {
    query: String,
    page: Option<u32>,
    exhausted: bool,
}

/// Search state of one theme.
#[derive(Debug)]
struct ThemeQueue {
    cursors: Vec<QueryCursor>,
    /// Query that word queries extend
    base: String,
    word_queries: u32,
    turn: usize,
    pending: VecDeque<SearchResult>,
    /// The search collaborator failed for this theme
    unavailable: bool,
}

impl ThemeQueue {
    fn new(theme: &Theme) -> Self {
        Self {
            cursors: theme
                .queries
                .iter()
                .map(|q| QueryCursor {
                    query: q.clone(),
                    page: None,
                    exhausted: false,
                })
                .collect(),
            base: theme.queries.first().cloned().unwrap_or_default(),
            word_queries: 0,
            turn: 0,
            pending: VecDeque::new(),
            unavailable: false,
        }
    }

    /// Next live query, rotating through the theme's queries.
    fn next_cursor(&mut self) -> Option<usize> {
        let n = self.cursors.len();
        let idx = (0..n)
            .map(|i| (self.turn + i) % n)
            .find(|&i| !self.cursors[i].exhausted)?;
        self.turn = (idx + 1) % n;
        Some(idx)
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.cursors.iter().all(|c| c.exhausted)
    }

    /// Add a query made of the base query and `word`.
    fn push_word_query(&mut self, word: &str) {
        self.cursors.push(QueryCursor {
            query: format!("{} {word}", self.base),
            page: None,
            exhausted: false,
        });
        self.word_queries += 1;
    }

    fn mark_unavailable(&mut self) {
        self.unavailable = true;
        for cursor in &mut self.cursors {
            cursor.exhausted = true;
        }
    }
}

/// Result of processing one reference on a worker.
#[derive(Debug)]
enum WorkOutcome {
    /// Candidates and where the router wants them
    Fetched { routed: Vec<(Candidate, Routing)> },
    /// Nothing usable came out of the reference
    Missed { reason: String },
    /// A collaborator the run cannot continue without failed
    Fatal { error: EngineError },
}

/// Read-only state shared with worker tasks.
struct WorkerContext {
    fetcher: Arc<dyn ExcerptFetcher>,
    slicer: Arc<dyn ClipSlicer>,
    router: Arc<dyn Router>,
    themes: Vec<Theme>,
    plan: SlicePlan,
    window: f64,
    staging_dir: PathBuf,
    fetch_retry: RetryConfig,
}

pub(crate) struct Orchestrator {
    config: EngineConfig,
    session: Session,
    search: Arc<dyn SearchSource>,
    scorer: Option<Arc<dyn Scorer>>,
    worker: Arc<WorkerContext>,
    ledger: Arc<DedupLedger>,
    tracker: BankTracker,
    queues: Vec<ThemeQueue>,
    words: Option<WordPool>,
    logger: RunLogger,
    status_tx: watch::Sender<RunStatus>,
    stop_rx: watch::Receiver<bool>,
    misses: FailureTracker,
    last_error: Option<String>,
}

pub(crate) struct OrchestratorParts {
    pub config: EngineConfig,
    pub session: Session,
    pub search: Arc<dyn SearchSource>,
    pub fetcher: Arc<dyn ExcerptFetcher>,
    pub slicer: Arc<dyn ClipSlicer>,
    pub scorer: Option<Arc<dyn Scorer>>,
    pub router: Arc<dyn Router>,
    pub ledger: Arc<DedupLedger>,
    pub tracker: BankTracker,
    pub words: Option<WordPool>,
    pub logger: RunLogger,
    pub status_tx: watch::Sender<RunStatus>,
    pub stop_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub(crate) fn new(parts: OrchestratorParts) -> Self {
        let OrchestratorParts {
            config,
            session,
            search,
            fetcher,
            slicer,
            scorer,
            router,
            ledger,
            tracker,
            words,
            logger,
            status_tx,
            stop_rx,
        } = parts;

        let themes = tracker.themes();
        let worker = Arc::new(WorkerContext {
            fetcher,
            slicer,
            router,
            themes: themes.clone(),
            plan: config.slice_plan(),
            window: config.window_secs,
            staging_dir: session.staging_dir.clone(),
            fetch_retry: RetryConfig::new("fetch").with_max_retries(config.fetch_retries),
        });

        Self {
            queues: themes.iter().map(ThemeQueue::new).collect(),
            config,
            session,
            search,
            scorer,
            worker,
            ledger,
            tracker,
            words,
            logger,
            status_tx,
            stop_rx,
            misses: FailureTracker::new(MAX_LOGGED_MISSES),
            last_error: None,
        }
    }

    pub(crate) fn snapshot(&self, state: RunState) -> RunStatus {
        RunStatus {
            run_id: self.logger.run_id().to_string(),
            session_id: self.session.id.clone(),
            state,
            themes: self.tracker.status(),
            references: self.ledger.len(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self, state: RunState) {
        self.status_tx.send_replace(self.snapshot(state));
    }

    /// Drive the run to a terminal state.
    pub(crate) async fn run(mut self) -> RunStatus {
        let span = self.logger.create_span();
        async move {
            self.logger.log_start(&format!(
                "{} themes, {} workers, resumed: {}",
                self.queues.len(),
                self.config.workers,
                self.session.resumed
            ));
            self.publish(RunState::Running);

            let state = match self.fill().await {
                Ok(state) => state,
                Err(e) => {
                    self.logger.log_error(&e.to_string());
                    self.last_error = Some(e.to_string());
                    RunState::Failed
                }
            };

            self.session.finish(state).await;
            metrics::record_run_finished(state.as_str());

            let status = self.snapshot(state);
            self.status_tx.send_replace(status.clone());
            self.logger.log_completion(&format!(
                "{} with {}/{} clips",
                state,
                status.total_accepted(),
                status.total_target()
            ));
            status
        }
        .instrument(span)
        .await
    }

    async fn fill(&mut self) -> EngineResult<RunState> {
        self.preflight().await?;

        loop {
            if self.tracker.goal_reached() {
                return self.final_state();
            }
            if *self.stop_rx.borrow() {
                info!("Stop requested");
                return Ok(RunState::Stopped);
            }

            self.refill_queues().await;

            let batch = self.take_batch();
            if batch.is_empty() {
                continue;
            }

            debug!(size = batch.len(), "Dispatching batch");
            let outcomes = self.dispatch(batch).await;
            self.apply(outcomes).await?;

            let status = self.snapshot(RunState::Running);
            self.logger.log_progress(&format!(
                "{}/{} clips ({}%)",
                status.total_accepted(),
                status.total_target(),
                status.percent()
            ));
            self.status_tx.send_replace(status);
        }
    }

    async fn preflight(&self) -> EngineResult<()> {
        let Some(scorer) = &self.scorer else {
            return Ok(());
        };
        match scorer.health_check().await {
            Ok(true) => {
                info!("Scoring service healthy");
                Ok(())
            }
            Ok(false) => Err(EngineError::scoring_unavailable("service reports not ready")),
            Err(e) => Err(EngineError::scoring_unavailable(e.to_string())),
        }
    }

    /// COMPLETED, unless every unfinished theme lost its search source.
    fn final_state(&mut self) -> EngineResult<RunState> {
        let unfilled: Vec<ThemeId> = self
            .tracker
            .theme_ids()
            .filter(|&id| !self.tracker.is_full(id) && !self.tracker.exhausted(id))
            .collect();

        if !unfilled.is_empty() && unfilled.iter().all(|id| self.queues[id.index()].unavailable) {
            let message = self
                .last_error
                .clone()
                .unwrap_or_else(|| "search unavailable for every unfilled theme".to_string());
            return Err(EngineError::SearchUnavailable(message));
        }
        Ok(RunState::Completed)
    }

    /// Pull one search page for every unfinished theme with nothing queued.
    async fn refill_queues(&mut self) {
        let ids: Vec<ThemeId> = self.tracker.theme_ids().collect();
        for id in ids {
            if self.tracker.is_done(id) || !self.queues[id.index()].pending.is_empty() {
                continue;
            }
            self.pull_page(id).await;
            if self.queues[id.index()].is_exhausted() && !self.extend_with_word(id) {
                self.tracker.mark_search_exhausted(id);
            }
        }
    }

    /// Give a theme whose queries ran dry a query from the words list.
    fn extend_with_word(&mut self, id: ThemeId) -> bool {
        let Some(pool) = self.words.as_mut() else {
            return false;
        };
        let Some(theme) = self.tracker.theme(id) else {
            return false;
        };
        let queue = &mut self.queues[id.index()];
        if queue.unavailable || !pool.allows(&theme.name, queue.word_queries) {
            return false;
        }
        let Some(word) = pool.draw() else {
            return false;
        };

        queue.push_word_query(&word);
        debug!(
            theme = %theme.name,
            word = %word,
            words_left = pool.remaining(),
            "Extending search with a word"
        );
        true
    }

    async fn pull_page(&mut self, id: ThemeId) {
        let idx = id.index();
        let Some(cursor_idx) = self.queues[idx].next_cursor() else {
            return;
        };
        let query = self.queues[idx].cursors[cursor_idx].query.clone();
        let page = self.queues[idx].cursors[cursor_idx].page;
        let theme_name = self
            .tracker
            .theme(id)
            .map(|t| t.name.clone())
            .unwrap_or_default();

        let retry = RetryConfig::new("search").with_max_retries(self.config.search_retries);
        let search = Arc::clone(&self.search);
        let result = retry_async_if(
            &retry,
            || search.search(id, &query, page),
            |e: &MediaError| !e.is_tool_missing(),
        )
        .await
        .into_result();

        let queue = &mut self.queues[idx];
        match result {
            Ok(found) => {
                let cursor = &mut queue.cursors[cursor_idx];
                cursor.page = found.next;
                if found.results.is_empty() || found.next.is_none() {
                    cursor.exhausted = true;
                }

                let total = found.results.len();
                let fresh: Vec<SearchResult> = found
                    .results
                    .into_iter()
                    .filter(|r| !self.ledger.contains(&r.media))
                    .collect();
                debug!(
                    theme = %theme_name,
                    query = %query,
                    page = ?page,
                    results = total,
                    fresh = fresh.len(),
                    "Search page"
                );
                queue.pending.extend(fresh);
            }
            Err(e) => {
                queue.mark_unavailable();
                self.logger
                    .log_warning(&format!("search failed for {theme_name} ({query}): {e}"));
                self.last_error = Some(format!("search failed for {theme_name}: {e}"));
            }
        }
    }

    /// Reserve up to `workers` references, one per theme per pass.
    ///
    /// A theme with a retry budget never has more references in flight
    /// than misses it may still take.
    fn take_batch(&mut self) -> Vec<SearchResult> {
        let workers = self.config.workers;
        let mut quota: Vec<Option<u32>> = self
            .tracker
            .theme_ids()
            .map(|id| {
                if self.tracker.is_full(id) || self.tracker.exhausted(id) {
                    Some(0)
                } else {
                    self.tracker.remaining_budget(id)
                }
            })
            .collect();

        let mut batch = Vec::with_capacity(workers);
        loop {
            let mut progressed = false;
            for (idx, queue) in self.queues.iter_mut().enumerate() {
                if batch.len() >= workers {
                    return batch;
                }
                if quota[idx] == Some(0) {
                    continue;
                }
                while let Some(result) = queue.pending.pop_front() {
                    if self.ledger.try_reserve(&result.media) {
                        batch.push(result);
                        if let Some(q) = quota[idx].as_mut() {
                            *q -= 1;
                        }
                        progressed = true;
                        break;
                    }
                    debug!(url = %result.media.url, "Reference already attempted");
                }
            }
            if !progressed {
                return batch;
            }
        }
    }

    /// Run a batch on the pool. Outcomes come back in dispatch order.
    async fn dispatch(
        &self,
        batch: Vec<SearchResult>,
    ) -> Vec<(ThemeId, Result<WorkOutcome, JoinError>)> {
        let (origins, handles): (Vec<ThemeId>, Vec<_>) = batch
            .into_iter()
            .map(|result| {
                let origin = result.theme;
                let ctx = Arc::clone(&self.worker);
                let handle = tokio::spawn(
                    process_reference(ctx, result).instrument(tracing::Span::current()),
                );
                (origin, handle)
            })
            .unzip();

        let results = join_all(handles).await;
        origins.into_iter().zip(results).collect()
    }

    async fn apply(
        &mut self,
        outcomes: Vec<(ThemeId, Result<WorkOutcome, JoinError>)>,
    ) -> EngineResult<()> {
        let mut fatal: Option<EngineError> = None;

        for (origin, joined) in outcomes {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(theme = %origin, "Worker task failed: {}", e);
                    self.tracker.record_miss(origin);
                    continue;
                }
            };

            match outcome {
                WorkOutcome::Missed { reason } => {
                    if self.misses.record_failure() {
                        warn!(theme = %origin, "Miss: {}", reason);
                    } else {
                        debug!(theme = %origin, "Miss: {}", reason);
                    }
                    self.tracker.record_miss(origin);
                }
                WorkOutcome::Fatal { error } => {
                    fatal.get_or_insert(error);
                }
                WorkOutcome::Fetched { routed } => {
                    let mut origin_accepted = false;
                    for (candidate, routing) in routed {
                        match self.place(candidate, routing).await {
                            Ok(Some(theme)) => {
                                self.misses.record_success();
                                origin_accepted |= theme == origin;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                fatal.get_or_insert(e);
                            }
                        }
                    }
                    if !origin_accepted {
                        self.tracker.record_miss(origin);
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply one routing decision. Returns the theme the candidate landed in.
    async fn place(&mut self, candidate: Candidate, routing: Routing) -> EngineResult<Option<ThemeId>> {
        let (theme, score) = match routing {
            Routing::Assigned { theme, score } => (theme, score),
            Routing::Rejected(reason) => {
                metrics::record_clip_rejected(reason.as_str());
                discard_candidate(&candidate).await;
                return Ok(None);
            }
        };

        match self.tracker.accept(theme, &candidate, score).await {
            Ok(Some(entry)) => {
                let name = self.tracker.theme(theme).map(|t| t.name.clone()).unwrap_or_default();
                info!(
                    theme = %name,
                    entry = %entry.path.display(),
                    url = %candidate.media.url,
                    cross_theme = theme != candidate.origin,
                    "Accepted clip"
                );
                metrics::record_clip_accepted(&name);
                metrics::set_bank_fill(
                    &name,
                    self.tracker.accepted(theme),
                    self.tracker.theme(theme).map_or(0, |t| t.target),
                );
                Ok(Some(theme))
            }
            Ok(None) => {
                metrics::record_clip_rejected(RejectReason::ThemeFull.as_str());
                discard_candidate(&candidate).await;
                Ok(None)
            }
            Err(e) => {
                discard_candidate(&candidate).await;
                Err(e)
            }
        }
    }
}

/// Fetch, slice and route one reference.
async fn process_reference(ctx: Arc<WorkerContext>, result: SearchResult) -> WorkOutcome {
    let fetched = retry_async_if(
        &ctx.fetch_retry,
        || ctx.fetcher.fetch(&result, ctx.window),
        FetchError::is_retryable,
    )
    .await
    .into_result();

    let excerpt = match fetched {
        Ok(excerpt) => {
            metrics::record_fetch(excerpt.strategy.label(), "ok");
            excerpt
        }
        Err(e) => {
            metrics::record_fetch("none", e.kind());
            debug!(url = %result.media.url, "Fetch failed: {}", e);
            return WorkOutcome::Missed {
                reason: e.to_string(),
            };
        }
    };

    let sliced = ctx
        .slicer
        .slice(&excerpt, result.theme, &ctx.plan, &ctx.staging_dir)
        .await;
    excerpt.discard();

    let candidates = match sliced {
        Ok(candidates) if candidates.is_empty() => {
            return WorkOutcome::Missed {
                reason: "excerpt too short for a clip".to_string(),
            };
        }
        Ok(candidates) => candidates,
        Err(e) => {
            return WorkOutcome::Missed {
                reason: format!("slicing failed: {e}"),
            };
        }
    };

    let mut routed = Vec::with_capacity(candidates.len());
    let mut remaining = candidates.into_iter();
    while let Some(mut candidate) = remaining.next() {
        match ctx.router.route(&mut candidate, &ctx.themes).await {
            Ok(routing) => routed.push((candidate, routing)),
            Err(error) => {
                discard_candidate(&candidate).await;
                for c in remaining {
                    discard_candidate(&c).await;
                }
                for (c, _) in routed {
                    discard_candidate(&c).await;
                }
                return WorkOutcome::Fatal { error };
            }
        }
    }

    WorkOutcome::Fetched { routed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbank_models::{parse_themes, ThemeSpec};

    fn theme(search: &str) -> Theme {
        parse_themes(
            vec![ThemeSpec {
                name: "T".to_string(),
                search: search.to_string(),
                prompt: None,
                target: None,
            }],
            1,
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn test_queries_rotate_until_exhausted() {
        let mut queue = ThemeQueue::new(&theme("a, b, c"));
        assert_eq!(queue.next_cursor(), Some(0));
        assert_eq!(queue.next_cursor(), Some(1));
        queue.cursors[2].exhausted = true;
        assert_eq!(queue.next_cursor(), Some(0));
        assert_eq!(queue.next_cursor(), Some(1));

        queue.cursors[0].exhausted = true;
        queue.cursors[1].exhausted = true;
        assert_eq!(queue.next_cursor(), None);
        assert!(queue.is_exhausted());
    }

    #[test]
    fn test_word_query_revives_exhausted_queue() {
        let mut queue = ThemeQueue::new(&theme("rain, storm"));
        queue.cursors[0].exhausted = true;
        queue.cursors[1].exhausted = true;
        assert!(queue.is_exhausted());

        queue.push_word_query("harbor");
        assert!(!queue.is_exhausted());
        assert_eq!(queue.word_queries, 1);
        let idx = queue.next_cursor().unwrap();
        assert_eq!(queue.cursors[idx].query, "rain harbor");
    }

    #[test]
    fn test_unavailable_queue_is_exhausted() {
        let mut queue = ThemeQueue::new(&theme("a, b"));
        assert!(!queue.is_exhausted());
        queue.mark_unavailable();
        assert!(queue.unavailable);
        assert!(queue.is_exhausted());
    }
}
