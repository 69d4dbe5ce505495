use crate::config::Settings;
use crate::domains::sessions::db_sessions::{SessionMethods, WorktreeWriteOutcome};
use crate::domains::sessions::entity::{
    Session, SessionStatus, WorktreeRecord, is_valid_session_name,
};
use crate::errors::WerkbankError;
use crate::infrastructure::database::Database;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// Authoritative view of sessions and their worktree records. All reads go
/// straight to the database; nothing here is cached.
pub struct SessionRegistry {
    db: Database,
    settings: Settings,
}

impl SessionRegistry {
    pub fn new(db: Database, settings: Settings) -> Self {
        Self { db, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn create_session(
        &self,
        name: &str,
        description: Option<String>,
        external_task_ref: Option<String>,
    ) -> Result<Session, WerkbankError> {
        if !is_valid_session_name(name) {
            return Err(WerkbankError::InvalidSessionName {
                name: name.to_string(),
            });
        }
        if self.try_get_session(name)?.is_some() {
            return Err(WerkbankError::SessionAlreadyExists {
                name: name.to_string(),
            });
        }

        let path = self.settings.session_dir(name);
        fs::create_dir_all(&path)
            .map_err(|e| WerkbankError::io("create session directory", path.display(), e))?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            path: path.clone(),
            status: SessionStatus::Active,
            description,
            external_task_ref,
            projects: Vec::new(),
            worktrees: Default::default(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.db.create_session(&session) {
            // The directory was allocated for this row; take it back so a
            // retry starts from nothing.
            if let Err(rm) = fs::remove_dir_all(&path) {
                log::warn!(
                    "Failed to roll back session directory {}: {rm}",
                    path.display()
                );
            }
            if is_unique_violation(&e) {
                return Err(WerkbankError::SessionAlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(WerkbankError::database(e));
        }

        log::info!("Created session '{name}' at {}", path.display());
        Ok(session)
    }

    pub fn get_session(&self, name: &str) -> Result<Session, WerkbankError> {
        self.try_get_session(name)?
            .ok_or_else(|| WerkbankError::SessionNotFound {
                name: name.to_string(),
            })
    }

    fn try_get_session(&self, name: &str) -> Result<Option<Session>, WerkbankError> {
        self.db
            .get_session_by_name(name)
            .map_err(WerkbankError::database)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, WerkbankError> {
        self.db.list_sessions().map_err(WerkbankError::database)
    }

    pub fn archive_session(&self, name: &str) -> Result<(), WerkbankError> {
        self.set_status(name, SessionStatus::Archived)
    }

    pub fn activate_session(&self, name: &str) -> Result<(), WerkbankError> {
        self.set_status(name, SessionStatus::Active)
    }

    fn set_status(&self, name: &str, status: SessionStatus) -> Result<(), WerkbankError> {
        let changed = self
            .db
            .update_session_status(name, status)
            .map_err(WerkbankError::database)?;
        if !changed {
            return Err(WerkbankError::SessionNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn use_session(&self, name: &str) -> Result<Session, WerkbankError> {
        let session = self.get_session(name)?;
        self.db
            .set_current_session(Some(name))
            .map_err(WerkbankError::database)?;
        Ok(session)
    }

    /// The session the current pointer names, or None. A dangling pointer
    /// (session row deleted out from under it) is cleared on read.
    pub fn current_session(&self) -> Result<Option<Session>, WerkbankError> {
        let Some(name) = self
            .db
            .get_current_session()
            .map_err(WerkbankError::database)?
        else {
            return Ok(None);
        };
        match self.try_get_session(&name)? {
            Some(session) => Ok(Some(session)),
            None => {
                log::warn!("Current session pointer '{name}' is dangling, clearing it");
                self.db
                    .set_current_session(None)
                    .map_err(WerkbankError::database)?;
                Ok(None)
            }
        }
    }

    pub fn clear_current_session(&self) -> Result<(), WerkbankError> {
        self.db
            .set_current_session(None)
            .map_err(WerkbankError::database)
    }

    /// Records a freshly created worktree against a session. The absence
    /// check runs inside the database transaction that writes the record.
    pub fn record_worktree(
        &self,
        session_name: &str,
        project_name: &str,
        record: &WorktreeRecord,
    ) -> Result<(), WerkbankError> {
        let outcome = self
            .db
            .add_worktree_record(session_name, project_name, record)
            .map_err(WerkbankError::database)?;
        match outcome {
            WorktreeWriteOutcome::Applied => Ok(()),
            WorktreeWriteOutcome::SessionMissing => Err(WerkbankError::SessionNotFound {
                name: session_name.to_string(),
            }),
            WorktreeWriteOutcome::AlreadyPresent => Err(WerkbankError::WorktreeAlreadyExists {
                project: project_name.to_string(),
                session: session_name.to_string(),
            }),
            WorktreeWriteOutcome::NotPresent => unreachable!("add never reports NotPresent"),
        }
    }

    pub fn forget_worktree(
        &self,
        session_name: &str,
        project_name: &str,
    ) -> Result<(), WerkbankError> {
        let outcome = self
            .db
            .remove_worktree_record(session_name, project_name)
            .map_err(WerkbankError::database)?;
        match outcome {
            WorktreeWriteOutcome::Applied => Ok(()),
            WorktreeWriteOutcome::SessionMissing => Err(WerkbankError::SessionNotFound {
                name: session_name.to_string(),
            }),
            WorktreeWriteOutcome::NotPresent => Err(WerkbankError::WorktreeNotFound {
                project: project_name.to_string(),
                session: session_name.to_string(),
            }),
            WorktreeWriteOutcome::AlreadyPresent => {
                unreachable!("remove never reports AlreadyPresent")
            }
        }
    }

    /// Deletes the session row and its directory. Worktree teardown is the
    /// caller's job; this only handles registry state.
    pub fn delete_session_record(&self, name: &str) -> Result<PathBuf, WerkbankError> {
        let session = self.get_session(name)?;

        if let Some(current) = self
            .db
            .get_current_session()
            .map_err(WerkbankError::database)?
            && current == name
        {
            self.db
                .set_current_session(None)
                .map_err(WerkbankError::database)?;
        }

        self.db.delete_session(name).map_err(WerkbankError::database)?;

        if session.path.exists()
            && let Err(e) = fs::remove_dir_all(&session.path)
        {
            log::warn!(
                "Failed to remove session directory {}: {e}",
                session.path.display()
            );
        }
        log::info!("Removed session '{name}'");
        Ok(session.path)
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::infrastructure::database::initialize_schema;
    use tempfile::TempDir;

    fn test_registry() -> (SessionRegistry, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        initialize_schema(&db).unwrap();
        let settings = Settings::new(tmp.path().join("sessions"));
        (SessionRegistry::new(db, settings), tmp)
    }

    #[test]
    fn create_session_allocates_directory() {
        let (registry, _tmp) = test_registry();
        let session = registry.create_session("demo", None, None).unwrap();
        assert!(session.path.is_dir());
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn duplicate_name_is_a_conflict() {
        let (registry, _tmp) = test_registry();
        registry.create_session("demo", None, None).unwrap();
        let err = registry.create_session("demo", None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn invalid_name_is_rejected_before_any_io() {
        let (registry, _tmp) = test_registry();
        let err = registry.create_session("../evil", None, None).unwrap_err();
        assert!(matches!(err, WerkbankError::InvalidSessionName { .. }));
        assert!(!registry.settings.sessions_root.exists());
    }

    #[test]
    fn use_and_current_session_round_trip() {
        let (registry, _tmp) = test_registry();
        registry.create_session("demo", None, None).unwrap();
        assert!(registry.current_session().unwrap().is_none());

        registry.use_session("demo").unwrap();
        let current = registry.current_session().unwrap().unwrap();
        assert_eq!(current.name, "demo");

        registry.clear_current_session().unwrap();
        assert!(registry.current_session().unwrap().is_none());
    }

    #[test]
    fn using_unknown_session_fails() {
        let (registry, _tmp) = test_registry();
        let err = registry.use_session("ghost").unwrap_err();
        assert!(matches!(err, WerkbankError::SessionNotFound { .. }));
    }

    #[test]
    fn archive_then_activate_flips_status() {
        let (registry, _tmp) = test_registry();
        registry.create_session("demo", None, None).unwrap();

        registry.archive_session("demo").unwrap();
        assert_eq!(
            registry.get_session("demo").unwrap().status,
            SessionStatus::Archived
        );

        registry.activate_session("demo").unwrap();
        assert_eq!(
            registry.get_session("demo").unwrap().status,
            SessionStatus::Active
        );
    }

    #[test]
    fn delete_clears_current_pointer_and_directory() {
        let (registry, _tmp) = test_registry();
        let session = registry.create_session("demo", None, None).unwrap();
        registry.use_session("demo").unwrap();

        let removed_path = registry.delete_session_record("demo").unwrap();
        assert_eq!(removed_path, session.path);
        assert!(!session.path.exists());
        assert!(registry.current_session().unwrap().is_none());
        assert!(matches!(
            registry.get_session("demo").unwrap_err(),
            WerkbankError::SessionNotFound { .. }
        ));
    }

    #[test]
    fn record_worktree_rejects_duplicates() {
        let (registry, _tmp) = test_registry();
        registry.create_session("demo", None, None).unwrap();
        let record = WorktreeRecord {
            path: registry.settings.worktree_dir("demo", "api"),
            branch: "demo".to_string(),
            created_at: Utc::now(),
        };

        registry.record_worktree("demo", "api", &record).unwrap();
        let err = registry.record_worktree("demo", "api", &record).unwrap_err();
        assert!(matches!(err, WerkbankError::WorktreeAlreadyExists { .. }));

        registry.forget_worktree("demo", "api").unwrap();
        let err = registry.forget_worktree("demo", "api").unwrap_err();
        assert!(matches!(err, WerkbankError::WorktreeNotFound { .. }));
    }
}
