//! Starting, observing and stopping a fill run.

use sbank_media::{ClipSlicer, ExcerptFetcher, FfmpegSlicer, SearchSource, YtDlpFetcher, YtDlpSearch};
use sbank_models::{RunState, RunStatus};
use sbank_scoring::ScoringClient;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::DedupLedger;
use crate::logging::RunLogger;
use crate::orchestrator::{Orchestrator, OrchestratorParts};
use crate::router::{RuleRouter, Router, ScoredRouter, Scorer};
use crate::session::Session;
use crate::tracker::BankTracker;
use crate::words::WordPool;

/// External services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchSource>,
    pub fetcher: Arc<dyn ExcerptFetcher>,
    pub slicer: Arc<dyn ClipSlicer>,
    /// Required when scoring is enabled, ignored otherwise
    pub scorer: Option<Arc<dyn Scorer>>,
}

impl Collaborators {
    /// yt-dlp, FFmpeg and the HTTP scoring service.
    pub fn production(config: &EngineConfig) -> EngineResult<Self> {
        let search = YtDlpSearch::new(config.search_results_per_theme);
        let fetcher = YtDlpFetcher::new(config.fetcher_config(&std::env::temp_dir()));
        let slicer = FfmpegSlicer::new(config.clip_format.clone());

        let scorer: Option<Arc<dyn Scorer>> = if config.scoring_enabled {
            let client = ScoringClient::new(config.scoring_config())
                .map_err(|e| EngineError::scoring_unavailable(e.to_string()))?;
            Some(Arc::new(client))
        } else {
            None
        };

        Ok(Self {
            search: Arc::new(search),
            fetcher: Arc::new(fetcher),
            slicer: Arc::new(slicer),
            scorer,
        })
    }
}

/// Requests a stop from anywhere, independent of the handle's lifetime.
#[derive(Debug, Clone)]
pub struct RunStopper {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl RunStopper {
    /// In-flight work finishes and is applied before the run stops.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

/// Handle to a running fill.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    session_id: String,
    stopper: RunStopper,
    status_rx: watch::Receiver<RunStatus>,
    task: JoinHandle<RunStatus>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn stopper(&self) -> RunStopper {
        self.stopper.clone()
    }

    /// Latest status snapshot.
    pub fn status(&self) -> RunStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_rx.clone()
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> RunStatus {
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                let mut status = self.status_rx.borrow().clone();
                status.state = RunState::Failed;
                status.last_error = Some(format!("run task aborted: {e}"));
                status
            }
        }
    }
}

/// Validate `config`, open the session and start filling in the background.
pub async fn start(config: EngineConfig, collaborators: Collaborators) -> EngineResult<RunHandle> {
    config.validate()?;

    let scorer = match (config.scoring_enabled, collaborators.scorer) {
        (true, Some(scorer)) => Some(scorer),
        (true, None) => return Err(EngineError::config("scoring enabled without a scorer")),
        (false, _) => None,
    };
    let router: Arc<dyn Router> = match &scorer {
        Some(scorer) => Arc::new(
            ScoredRouter::new(Arc::clone(scorer))
                .with_tie_break(config.tie_break)
                .with_min_similarity(config.min_similarity),
        ),
        None => Arc::new(RuleRouter),
    };

    let session = Session::open(&config.output_dir, config.session_id.as_deref()).await?;
    let (tracker, restored) =
        BankTracker::open(&config.themes, &session.themes_dir, config.retry_budget, &session.id)
            .await?;
    let ledger = Arc::new(DedupLedger::seeded(&restored.urls));
    if restored.entries > 0 {
        info!(
            entries = restored.entries,
            urls = ledger.len(),
            "Rebuilt bank state from existing entries"
        );
    }

    let words = match &config.words {
        Some(words) => WordPool::load(words).await,
        None => None,
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let logger = RunLogger::new(&run_id, &session.id);
    let session_id = session.id.clone();

    let (stop_tx, stop_rx) = watch::channel(false);
    let (status_tx, status_rx) = watch::channel(RunStatus {
        run_id: run_id.clone(),
        session_id: session_id.clone(),
        state: RunState::Running,
        themes: tracker.status(),
        references: ledger.len(),
        last_error: None,
    });

    let orchestrator = Orchestrator::new(OrchestratorParts {
        config,
        session,
        search: collaborators.search,
        fetcher: collaborators.fetcher,
        slicer: collaborators.slicer,
        scorer,
        router,
        ledger,
        tracker,
        words,
        logger,
        status_tx,
        stop_rx,
    });
    let task = tokio::spawn(orchestrator.run());

    Ok(RunHandle {
        run_id,
        session_id,
        stopper: RunStopper {
            stop_tx: Arc::new(stop_tx),
        },
        status_rx,
        task,
    })
}
