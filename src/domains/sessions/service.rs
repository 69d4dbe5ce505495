use crate::config::Settings;
use crate::domains::exec::SecureExecutor;
use crate::domains::git;
use crate::domains::rules::engine::{RuleApplicationReport, RuleContext, RuleEngine};
use crate::domains::sessions::db_projects::ProjectMethods;
use crate::domains::sessions::db_sessions::SessionMethods;
use crate::domains::sessions::entity::{Project, Session, WorktreeRecord, is_valid_session_name};
use crate::domains::sessions::registry::SessionRegistry;
use crate::domains::worktrees::{WorktreeHealth, WorktreeOrchestrator, WorktreeStatus};
use crate::errors::WerkbankError;
use crate::infrastructure::database::Database;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Live view of one worktree registration, status computed at call time.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeListing {
    pub project: String,
    pub path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub exists: bool,
    pub status: WorktreeStatus,
}

/// Entry point for embedders: composes the registry, the worktree
/// orchestrator and the rule engine behind one API.
pub struct SessionManager {
    db: Database,
    registry: SessionRegistry,
    settings: Settings,
}

impl SessionManager {
    pub fn new(db: Database, settings: Settings) -> Self {
        let registry = SessionRegistry::new(db.clone(), settings.clone());
        Self {
            db,
            registry,
            settings,
        }
    }

    // Session lifecycle, delegated to the registry.

    pub fn create_session(
        &self,
        name: &str,
        description: Option<String>,
        external_task_ref: Option<String>,
    ) -> Result<Session, WerkbankError> {
        self.registry.create_session(name, description, external_task_ref)
    }

    pub fn get_session(&self, name: &str) -> Result<Session, WerkbankError> {
        self.registry.get_session(name)
    }

    /// Whether `name` is free to use for a new session: well-formed, not
    /// taken in the registry, and no registered project already carries a
    /// branch of that name (the session name doubles as the branch name).
    pub fn session_name_available(&self, name: &str) -> Result<bool, WerkbankError> {
        if !is_valid_session_name(name) {
            return Ok(false);
        }
        if self
            .db
            .get_session_by_name(name)
            .map_err(WerkbankError::database)?
            .is_some()
        {
            return Ok(false);
        }
        for project in self.list_projects()? {
            if git::branch_exists(&project.path, name).unwrap_or(false) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, WerkbankError> {
        self.registry.list_sessions()
    }

    pub fn use_session(&self, name: &str) -> Result<Session, WerkbankError> {
        self.registry.use_session(name)
    }

    pub fn current_session(&self) -> Result<Option<Session>, WerkbankError> {
        self.registry.current_session()
    }

    pub fn archive_session(&self, name: &str) -> Result<(), WerkbankError> {
        self.registry.archive_session(name)
    }

    pub fn activate_session(&self, name: &str) -> Result<(), WerkbankError> {
        self.registry.activate_session(name)
    }

    // Project store.

    pub fn register_project(&self, mut project: Project) -> Result<Project, WerkbankError> {
        if !project.path.is_dir() {
            return Err(WerkbankError::invalid_argument(
                "path",
                format!("project path does not exist: {}", project.path.display()),
            ));
        }
        if project.default_branch.is_empty() {
            project.default_branch = git::default_branch(&project.path)
                .map_err(|e| WerkbankError::invalid_argument("default_branch", e))?;
        }
        self.db
            .upsert_project(&project)
            .map_err(WerkbankError::database)?;
        log::info!(
            "Registered project '{}' at {}",
            project.name,
            project.path.display()
        );
        Ok(project)
    }

    pub fn get_project(&self, name: &str) -> Result<Project, WerkbankError> {
        self.db
            .get_project(name)
            .map_err(WerkbankError::database)?
            .ok_or_else(|| WerkbankError::ProjectNotFound {
                name: name.to_string(),
            })
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, WerkbankError> {
        self.db.list_projects().map_err(WerkbankError::database)
    }

    pub fn deregister_project(&self, name: &str) -> Result<(), WerkbankError> {
        let removed = self
            .db
            .delete_project(name)
            .map_err(WerkbankError::database)?;
        if !removed {
            return Err(WerkbankError::ProjectNotFound {
                name: name.to_string(),
            });
        }
        // Existing worktrees stay functional: removal recovers the parent
        // repository through the gitdir pointer.
        Ok(())
    }

    // Worktree lifecycle.

    /// Create a worktree for (project, session), record it, then apply the
    /// project's rules. Rule failures are reported in the returned report,
    /// never raised; the worktree stays usable.
    pub fn add_worktree(
        &self,
        session_name: &str,
        project_name: &str,
        branch: Option<&str>,
    ) -> Result<(WorktreeRecord, RuleApplicationReport), WerkbankError> {
        let session = self.registry.get_session(session_name)?;
        if session.worktrees.contains_key(project_name) {
            return Err(WerkbankError::WorktreeAlreadyExists {
                project: project_name.to_string(),
                session: session_name.to_string(),
            });
        }
        let project = self.get_project(project_name)?;

        let executor = self.executor_for(&project.path);
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let branch = orchestrator.resolve_branch(&project, branch, session_name)?;
        let target = self.settings.worktree_dir(session_name, project_name);

        let record = orchestrator.create_worktree(&project, &branch, &target)?;

        if let Err(e) = self.registry.record_worktree(session_name, project_name, &record) {
            return Err(match e {
                // Lost a race or the session vanished mid-flight: the
                // worktree we just made has no owner, take it back down.
                WerkbankError::WorktreeAlreadyExists { .. }
                | WerkbankError::SessionNotFound { .. } => {
                    orchestrator.remove_worktree(Some(&project.path), &record.path);
                    e
                }
                // Registry write failed for real. The worktree is left on
                // disk for inspection; the caller gets the named failure.
                other => WerkbankError::RegistryUpdateFailed {
                    session: session_name.to_string(),
                    orphaned_path: record.path.display().to_string(),
                    message: other.to_string(),
                },
            });
        }

        let rule_executor = self.executor_for(&record.path);
        let engine = RuleEngine::new(&rule_executor);
        let ctx = RuleContext {
            session_name: session_name.to_string(),
            branch: branch.clone(),
            worktree_path: record.path.clone(),
        };
        let report = engine.apply_rules(&project, &ctx);
        if !report.success() {
            log::warn!(
                "{} rule(s) failed for '{project_name}' in session '{session_name}'",
                report.errors.len()
            );
        }

        Ok((record, report))
    }

    /// Tear down a worktree and drop its registration. Filesystem and git
    /// cleanup is best effort; only registry failures are raised.
    pub fn remove_worktree(
        &self,
        session_name: &str,
        project_name: &str,
    ) -> Result<(), WerkbankError> {
        let session = self.registry.get_session(session_name)?;
        let record = session.worktrees.get(project_name).ok_or_else(|| {
            WerkbankError::WorktreeNotFound {
                project: project_name.to_string(),
                session: session_name.to_string(),
            }
        })?;

        let project_path = self
            .db
            .get_project(project_name)
            .map_err(WerkbankError::database)?
            .map(|p| p.path);

        let executor = self.executor_for(&self.settings.sessions_root);
        let orchestrator = WorktreeOrchestrator::new(&executor);
        orchestrator.remove_worktree(project_path.as_deref(), &record.path);

        self.registry.forget_worktree(session_name, project_name)
    }

    /// Destroy a session and all its worktrees. Without `force`, any
    /// worktree holding uncommitted work blocks the removal and the error
    /// names the offending projects.
    pub fn remove_session(&self, name: &str, force: bool) -> Result<(), WerkbankError> {
        let session = self.registry.get_session(name)?;
        let executor = self.executor_for(&self.settings.sessions_root);
        let orchestrator = WorktreeOrchestrator::new(&executor);

        if !force {
            let mut offending = Vec::new();
            for (project_name, record) in &session.worktrees {
                let status = orchestrator.worktree_status(&record.path);
                // A status we cannot determine is treated as dirty. Invalid
                // means a directory with no .git marker: git cannot vouch
                // for its contents either.
                if status.has_changes()
                    || status == WorktreeStatus::Error
                    || status == WorktreeStatus::Invalid
                {
                    offending.push(project_name.clone());
                }
            }
            if !offending.is_empty() {
                return Err(WerkbankError::SessionHasChanges {
                    name: name.to_string(),
                    projects: offending,
                });
            }
        }

        for (project_name, record) in &session.worktrees {
            let project_path = self
                .db
                .get_project(project_name)
                .ok()
                .flatten()
                .map(|p| p.path);
            orchestrator.remove_worktree(project_path.as_deref(), &record.path);
        }

        self.registry.delete_session_record(name)?;
        Ok(())
    }

    // Inspection.

    pub fn list_worktrees(&self, session_name: &str) -> Result<Vec<WorktreeListing>, WerkbankError> {
        let session = self.registry.get_session(session_name)?;
        let executor = self.executor_for(&self.settings.sessions_root);
        let orchestrator = WorktreeOrchestrator::new(&executor);

        Ok(session
            .worktrees
            .iter()
            .map(|(project, record)| {
                let status = orchestrator.worktree_status(&record.path);
                WorktreeListing {
                    project: project.clone(),
                    path: record.path.clone(),
                    branch: record.branch.clone(),
                    created_at: record.created_at,
                    exists: status != WorktreeStatus::Missing,
                    status,
                }
            })
            .collect())
    }

    /// Health check every worktree of a session. Invalidity is reported in
    /// the returned map, not raised.
    pub fn validate_session(
        &self,
        session_name: &str,
    ) -> Result<BTreeMap<String, WorktreeHealth>, WerkbankError> {
        let session = self.registry.get_session(session_name)?;
        let executor = self.executor_for(&self.settings.sessions_root);
        let orchestrator = WorktreeOrchestrator::new(&executor);

        Ok(session
            .worktrees
            .iter()
            .map(|(project, record)| {
                (project.clone(), orchestrator.validate_worktree(&record.path))
            })
            .collect())
    }

    /// Remove worktree directories under the sessions root that no session
    /// claims. Run at startup to recover from crashes between filesystem
    /// and registry writes.
    pub fn sweep_orphans(&self) -> Result<(), WerkbankError> {
        let mut registered: HashSet<PathBuf> = HashSet::new();
        for session in self.registry.list_sessions()? {
            for record in session.worktrees.values() {
                let canonical = record
                    .path
                    .canonicalize()
                    .unwrap_or_else(|_| record.path.clone());
                registered.insert(canonical);
            }
        }

        let executor = self.executor_for(&self.settings.sessions_root);
        let orchestrator = WorktreeOrchestrator::new(&executor);
        orchestrator.sweep_orphans(&self.settings.sessions_root, &registered);
        Ok(())
    }

    fn executor_for(&self, root: &Path) -> SecureExecutor {
        SecureExecutor::new(
            root.to_path_buf(),
            self.settings.command_timeout,
            self.settings.debug,
        )
    }
}
