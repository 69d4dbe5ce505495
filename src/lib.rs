//! Session-scoped git worktree orchestration: a persistent registry of
//! sessions and projects, a worktree lifecycle built on external git
//! processes, declarative per-project setup rules, and an allow-list
//! command executor that every external process goes through.
//!
//! [`SessionManager`] is the entry point; everything else is reachable
//! through the domain modules for embedders that need the pieces.

pub mod config;
pub mod domains;
pub mod errors;
pub mod infrastructure;

pub use config::Settings;
pub use domains::exec::{CommandResult, SecureExecutor};
pub use domains::rules::{CopyStrategy, Rule, RuleApplicationReport, validate_rule_config};
pub use domains::sessions::{
    Project, Session, SessionManager, SessionRegistry, SessionStatus, WorktreeListing,
    WorktreeRecord,
};
pub use domains::worktrees::{WorktreeHealth, WorktreeStatus};
pub use errors::{ErrorKind, WerkbankError};
pub use infrastructure::database::{Database, initialize_schema};
