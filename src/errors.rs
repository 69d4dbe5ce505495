use serde::Serialize;
use std::fmt;

/// Broad error classification consumed by callers that only need to know
/// how to react, plus the process exit code the CLI layer maps each raised
/// error to.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ValidationFailure,
    SecurityViolation,
    ExecutionFailure,
    StateInconsistency,
    Fatal,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::NotFound => 10,
            Self::Conflict => 11,
            Self::ValidationFailure => 12,
            Self::SecurityViolation => 13,
            Self::ExecutionFailure => 14,
            Self::StateInconsistency => 15,
            Self::Fatal => 16,
        }
    }
}

/// Diagnostic bundle attached to a failed worktree creation. Captures
/// everything needed to reconstruct what git was asked to do.
#[derive(Debug, Serialize, Clone, Default)]
pub struct WorktreeDiagnostics {
    pub command: String,
    pub cwd: String,
    pub target_path: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
    pub hints: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", content = "data")]
pub enum WerkbankError {
    SessionNotFound {
        name: String,
    },
    SessionAlreadyExists {
        name: String,
    },
    InvalidSessionName {
        name: String,
    },
    SessionHasChanges {
        name: String,
        projects: Vec<String>,
    },
    ProjectNotFound {
        name: String,
    },
    WorktreeNotFound {
        project: String,
        session: String,
    },
    WorktreeAlreadyExists {
        project: String,
        session: String,
    },
    WorktreeCreationFailed {
        message: String,
        diagnostics: Box<WorktreeDiagnostics>,
    },
    RegistryUpdateFailed {
        session: String,
        orphaned_path: String,
        message: String,
    },
    CommandNotAllowed {
        command: String,
    },
    EnvironmentRejected {
        key: String,
        message: String,
    },
    PathEscape {
        path: String,
    },
    InvalidArgument {
        field: String,
        message: String,
    },
    CommandFailed {
        command: String,
        message: String,
    },
    CommandTimedOut {
        command: String,
        timeout_secs: u64,
    },
    InvalidRuleConfig {
        rule_type: String,
        message: String,
    },
    DatabaseError {
        message: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
}

impl WerkbankError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound { .. }
            | Self::ProjectNotFound { .. }
            | Self::WorktreeNotFound { .. } => ErrorKind::NotFound,
            Self::SessionAlreadyExists { .. } | Self::WorktreeAlreadyExists { .. } => {
                ErrorKind::Conflict
            }
            Self::InvalidSessionName { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidRuleConfig { .. } => ErrorKind::ValidationFailure,
            Self::CommandNotAllowed { .. }
            | Self::EnvironmentRejected { .. }
            | Self::PathEscape { .. } => ErrorKind::SecurityViolation,
            Self::WorktreeCreationFailed { .. }
            | Self::CommandFailed { .. }
            | Self::CommandTimedOut { .. } => ErrorKind::ExecutionFailure,
            Self::SessionHasChanges { .. } | Self::RegistryUpdateFailed { .. } => {
                ErrorKind::StateInconsistency
            }
            Self::DatabaseError { .. } | Self::IoError { .. } => ErrorKind::Fatal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        Self::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn invalid_argument(field: &str, message: impl ToString) -> Self {
        Self::InvalidArgument {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn database(error: impl ToString) -> Self {
        Self::DatabaseError {
            message: error.to_string(),
        }
    }
}

impl fmt::Display for WerkbankError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SessionNotFound { name } => write!(f, "Session '{name}' not found"),
            Self::SessionAlreadyExists { name } => {
                write!(f, "Session '{name}' already exists")
            }
            Self::InvalidSessionName { name } => write!(
                f,
                "Invalid session name '{name}': only ASCII letters, digits, '-' and '_' are allowed"
            ),
            Self::SessionHasChanges { name, projects } => write!(
                f,
                "Session '{name}' has uncommitted changes in: {}",
                projects.join(", ")
            ),
            Self::ProjectNotFound { name } => write!(f, "Project '{name}' not found"),
            Self::WorktreeNotFound { project, session } => {
                write!(
                    f,
                    "No worktree for project '{project}' in session '{session}'"
                )
            }
            Self::WorktreeAlreadyExists { project, session } => write!(
                f,
                "Session '{session}' already has a worktree for project '{project}'"
            ),
            Self::WorktreeCreationFailed { message, .. } => {
                write!(f, "Worktree creation failed: {message}")
            }
            Self::RegistryUpdateFailed {
                session,
                orphaned_path,
                message,
            } => write!(
                f,
                "Registry update for session '{session}' failed after worktree creation; \
                 worktree left orphaned at '{orphaned_path}': {message}"
            ),
            Self::CommandNotAllowed { command } => {
                write!(f, "Command '{command}' is not in the allow-list")
            }
            Self::EnvironmentRejected { key, message } => {
                write!(f, "Environment variable '{key}' rejected: {message}")
            }
            Self::PathEscape { path } => {
                write!(f, "Path '{path}' escapes the permitted root")
            }
            Self::InvalidArgument { field, message } => {
                write!(f, "Invalid argument '{field}': {message}")
            }
            Self::CommandFailed { command, message } => {
                write!(f, "Command '{command}' failed: {message}")
            }
            Self::CommandTimedOut {
                command,
                timeout_secs,
            } => write!(f, "Command '{command}' timed out after {timeout_secs}s"),
            Self::InvalidRuleConfig { rule_type, message } => {
                write!(f, "Invalid '{rule_type}' rule: {message}")
            }
            Self::DatabaseError { message } => write!(f, "Database error: {message}"),
            Self::IoError {
                operation,
                path,
                message,
            } => write!(f, "I/O error during '{operation}' on '{path}': {message}"),
        }
    }
}

impl std::error::Error for WerkbankError {}

impl From<WerkbankError> for String {
    fn from(error: WerkbankError) -> Self {
        error.to_string()
    }
}

impl From<rusqlite::Error> for WerkbankError {
    fn from(error: rusqlite::Error) -> Self {
        Self::database(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_stable_exit_code() {
        assert_eq!(ErrorKind::NotFound.exit_code(), 10);
        assert_eq!(ErrorKind::Conflict.exit_code(), 11);
        assert_eq!(ErrorKind::ValidationFailure.exit_code(), 12);
        assert_eq!(ErrorKind::SecurityViolation.exit_code(), 13);
        assert_eq!(ErrorKind::ExecutionFailure.exit_code(), 14);
        assert_eq!(ErrorKind::StateInconsistency.exit_code(), 15);
        assert_eq!(ErrorKind::Fatal.exit_code(), 16);
    }

    #[test]
    fn security_violations_are_never_downgraded() {
        let err = WerkbankError::CommandNotAllowed {
            command: "rm".into(),
        };
        assert_eq!(err.kind(), ErrorKind::SecurityViolation);
        assert_eq!(err.exit_code(), 13);
    }

    #[test]
    fn display_lists_offending_projects() {
        let err = WerkbankError::SessionHasChanges {
            name: "demo".into(),
            projects: vec!["api".into(), "web".into()],
        };
        assert!(err.to_string().contains("api, web"));
    }
}
