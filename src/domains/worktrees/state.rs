use crate::domains::git::StatusSummary;
use serde::Serialize;
use std::fmt;

/// Health of a (project, session) worktree, computed on read and never
/// stored. Precedence when several conditions hold:
/// Staged > Modified > Untracked > Clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStatus {
    /// No directory at the recorded path.
    Missing,
    /// Directory exists but carries no `.git` marker.
    Invalid,
    Clean,
    Staged,
    Modified,
    Untracked,
    /// `git status` could not be queried.
    Error,
}

impl WorktreeStatus {
    pub fn from_summary(summary: StatusSummary) -> Self {
        if summary.staged {
            Self::Staged
        } else if summary.modified {
            Self::Modified
        } else if summary.untracked {
            Self::Untracked
        } else {
            Self::Clean
        }
    }

    pub fn has_changes(self) -> bool {
        matches!(self, Self::Staged | Self::Modified | Self::Untracked)
    }
}

impl fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Missing => "missing",
            Self::Invalid => "invalid",
            Self::Clean => "clean",
            Self::Staged => "staged",
            Self::Modified => "modified",
            Self::Untracked => "untracked",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Result of `validate_worktree`: ordinary invalidity is reported, never
/// raised.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeHealth {
    pub valid: bool,
    pub issues: Vec<String>,
}
