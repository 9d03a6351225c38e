//! Run state and status snapshots.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::theme::ThemeId;

/// Lifecycle of a fill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Filling banks
    #[default]
    Running,
    /// Goal test passed
    Completed,
    /// Cancelled by the caller
    Stopped,
    /// Aborted on an unrecoverable collaborator error
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Stopped => "stopped",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-theme progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ThemeStatus {
    pub id: ThemeId,
    pub name: String,
    pub accepted: u32,
    pub target: u32,
    pub attempted: u32,
    pub exhausted: bool,
    pub search_exhausted: bool,
}

impl ThemeStatus {
    pub fn is_full(&self) -> bool {
        self.accepted >= self.target
    }
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct RunStatus {
    pub run_id: String,
    pub session_id: String,
    pub state: RunState,
    pub themes: Vec<ThemeStatus>,
    /// Distinct media references attempted in the session
    #[serde(default)]
    pub references: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunStatus {
    pub fn total_accepted(&self) -> u32 {
        self.themes.iter().map(|t| t.accepted).sum()
    }

    pub fn total_target(&self) -> u32 {
        self.themes.iter().map(|t| t.target).sum()
    }

    /// Overall fill percentage, 100 when nothing is requested.
    pub fn percent(&self) -> u32 {
        let target = self.total_target();
        if target == 0 {
            return 100;
        }
        (100 * self.total_accepted().min(target)) / target
    }

    pub fn theme(&self, name: &str) -> Option<&ThemeStatus> {
        self.themes.iter().find(|t| t.name == name)
    }
}
