//! Session directory layout.
//!
//! ```text
//! <output_dir>/<session_id>/themes/<theme>/<Theme>_NNN.wav
//! <output_dir>/<session_id>/staging/
//! ```

use chrono::Local;
use rand::Rng;
use sbank_media::reset_dir;
use sbank_models::RunState;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Directories of one fill session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub dir: PathBuf,
    pub themes_dir: PathBuf,
    pub staging_dir: PathBuf,
    /// The session directory existed before this run
    pub resumed: bool,
}

impl Session {
    /// Open `session_id` under `output_dir`, or create a new session.
    ///
    /// An existing session is resumed; its staging area is emptied.
    pub async fn open(output_dir: &Path, session_id: Option<&str>) -> EngineResult<Self> {
        let id = match session_id {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => new_session_id(),
        };

        let dir = output_dir.join(&id);
        let resumed = tokio::fs::try_exists(&dir).await?;
        let themes_dir = dir.join("themes");
        let staging_dir = dir.join("staging");

        tokio::fs::create_dir_all(&themes_dir).await?;
        reset_dir(&staging_dir).await?;

        if resumed {
            info!(session_id = %id, dir = %dir.display(), "Resuming session");
        } else {
            info!(session_id = %id, dir = %dir.display(), "Created session");
        }

        Ok(Self {
            id,
            dir,
            themes_dir,
            staging_dir,
            resumed,
        })
    }

    /// Leave the staging area empty, whatever state the run ended in.
    pub async fn finish(&self, state: RunState) {
        match reset_dir(&self.staging_dir).await {
            Ok(()) => debug!(dir = %self.staging_dir.display(), state = %state, "Staging cleaned"),
            Err(e) => warn!(dir = %self.staging_dir.display(), "Failed to clean staging: {}", e),
        }
    }
}

/// `YYYYMMDD_HHMMSS_xxxx` with a random hex suffix.
pub fn new_session_id() -> String {
    let suffix: u16 = rand::rng().random();
    format!("{}_{:04x}", Local::now().format("%Y%m%d_%H%M%S"), suffix)
}

fn validate_session_id(id: &str) -> EngineResult<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::session(format!("invalid session id {id:?}")))
    }
}
