use crate::domains::rules::Rule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Worktree registration embedded in a session. No independent identity:
/// created when the worktree is added, dropped when it is removed or the
/// session is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

/// The metadata blob persisted with each session row. Read and written
/// whole; `worktrees.keys ⊆ projects` is maintained by the registry writers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub worktrees: BTreeMap<String, WorktreeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub status: SessionStatus,
    pub description: Option<String>,
    pub external_task_ref: Option<String>,
    pub projects: Vec<String>,
    pub worktrees: BTreeMap<String, WorktreeRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            projects: self.projects.clone(),
            worktrees: self.worktrees.clone(),
        }
    }
}

/// Registered project a worktree can be checked out from. Owned by the
/// project store; read-only from the engine's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub project_type: String,
    pub default_branch: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_name_slug_pattern() {
        assert!(is_valid_session_name("demo"));
        assert!(is_valid_session_name("feature_x-2"));
        assert!(!is_valid_session_name(""));
        assert!(!is_valid_session_name("has space"));
        assert!(!is_valid_session_name("dot.dot"));
        assert!(!is_valid_session_name("slash/y"));
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let mut worktrees = BTreeMap::new();
        worktrees.insert(
            "api".to_string(),
            WorktreeRecord {
                path: PathBuf::from("/srv/sessions/demo/api"),
                branch: "demo".to_string(),
                created_at: Utc::now(),
            },
        );
        let metadata = SessionMetadata {
            projects: vec!["api".to_string()],
            worktrees,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        let back: SessionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.projects, vec!["api"]);
        assert_eq!(back.worktrees["api"].branch, "demo");
    }

    #[test]
    fn status_string_round_trip() {
        assert_eq!(
            SessionStatus::parse(SessionStatus::Active.as_str()),
            Some(SessionStatus::Active)
        );
        assert_eq!(
            SessionStatus::parse(SessionStatus::Archived.as_str()),
            Some(SessionStatus::Archived)
        );
        assert_eq!(SessionStatus::parse("cancelled"), None);
    }
}
