use crate::domains::sessions::entity::{Session, SessionMetadata, SessionStatus, WorktreeRecord};
use crate::infrastructure::database::Database;
use crate::infrastructure::database::timestamps::utc_from_epoch_seconds_lossy;
use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use std::path::PathBuf;

/// Outcome of the transactional insert-if-absent for a worktree record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorktreeWriteOutcome {
    Applied,
    SessionMissing,
    AlreadyPresent,
    NotPresent,
}

pub trait SessionMethods {
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session_by_name(&self, name: &str) -> Result<Option<Session>>;
    fn list_sessions(&self) -> Result<Vec<Session>>;
    fn update_session_status(&self, name: &str, status: SessionStatus) -> Result<bool>;
    fn delete_session(&self, name: &str) -> Result<bool>;
    fn add_worktree_record(
        &self,
        session_name: &str,
        project_name: &str,
        record: &WorktreeRecord,
    ) -> Result<WorktreeWriteOutcome>;
    fn remove_worktree_record(
        &self,
        session_name: &str,
        project_name: &str,
    ) -> Result<WorktreeWriteOutcome>;
    fn get_current_session(&self) -> Result<Option<String>>;
    fn set_current_session(&self, name: Option<&str>) -> Result<()>;
}

impl SessionMethods for Database {
    fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.get_conn()?;
        let metadata = serde_json::to_string(&session.metadata())?;
        conn.execute(
            "INSERT INTO sessions (
                id, name, path, status, description, external_task_ref,
                metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id,
                session.name,
                session.path.to_string_lossy(),
                session.status.as_str(),
                session.description,
                session.external_task_ref,
                metadata,
                session.created_at.timestamp(),
                session.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn get_session_by_name(&self, name: &str) -> Result<Option<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, status, description, external_task_ref,
                    metadata, created_at, updated_at
             FROM sessions WHERE name = ?1",
        )?;
        let session = stmt
            .query_row(params![name], row_to_session)
            .optional()?;
        Ok(session)
    }

    fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, status, description, external_task_ref,
                    metadata, created_at, updated_at
             FROM sessions ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_session)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn update_session_status(&self, name: &str, status: SessionStatus) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE name = ?3",
            params![status.as_str(), Utc::now().timestamp(), name],
        )?;
        Ok(changed > 0)
    }

    fn delete_session(&self, name: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute("DELETE FROM sessions WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    }

    fn add_worktree_record(
        &self,
        session_name: &str,
        project_name: &str,
        record: &WorktreeRecord,
    ) -> Result<WorktreeWriteOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        // Absence is re-checked inside the same transaction that writes the
        // blob, so two callers on this connection cannot both insert.
        let metadata: Option<String> = tx
            .query_row(
                "SELECT metadata FROM sessions WHERE name = ?1",
                params![session_name],
                |r| r.get(0),
            )
            .optional()?;
        let Some(metadata) = metadata else {
            return Ok(WorktreeWriteOutcome::SessionMissing);
        };

        let mut parsed: SessionMetadata = serde_json::from_str(&metadata)
            .map_err(|e| anyhow!("Corrupt session metadata for '{session_name}': {e}"))?;
        if parsed.worktrees.contains_key(project_name) {
            return Ok(WorktreeWriteOutcome::AlreadyPresent);
        }

        parsed
            .worktrees
            .insert(project_name.to_string(), record.clone());
        if !parsed.projects.iter().any(|p| p == project_name) {
            parsed.projects.push(project_name.to_string());
        }

        tx.execute(
            "UPDATE sessions SET metadata = ?1, updated_at = ?2 WHERE name = ?3",
            params![
                serde_json::to_string(&parsed)?,
                Utc::now().timestamp(),
                session_name
            ],
        )?;
        tx.commit()?;
        Ok(WorktreeWriteOutcome::Applied)
    }

    fn remove_worktree_record(
        &self,
        session_name: &str,
        project_name: &str,
    ) -> Result<WorktreeWriteOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let metadata: Option<String> = tx
            .query_row(
                "SELECT metadata FROM sessions WHERE name = ?1",
                params![session_name],
                |r| r.get(0),
            )
            .optional()?;
        let Some(metadata) = metadata else {
            return Ok(WorktreeWriteOutcome::SessionMissing);
        };

        let mut parsed: SessionMetadata = serde_json::from_str(&metadata)
            .map_err(|e| anyhow!("Corrupt session metadata for '{session_name}': {e}"))?;
        if parsed.worktrees.remove(project_name).is_none() {
            return Ok(WorktreeWriteOutcome::NotPresent);
        }
        parsed.projects.retain(|p| p != project_name);

        tx.execute(
            "UPDATE sessions SET metadata = ?1, updated_at = ?2 WHERE name = ?3",
            params![
                serde_json::to_string(&parsed)?,
                Utc::now().timestamp(),
                session_name
            ],
        )?;
        tx.commit()?;
        Ok(WorktreeWriteOutcome::Applied)
    }

    fn get_current_session(&self) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let current: Option<String> = conn.query_row(
            "SELECT current_session FROM app_state WHERE id = 1",
            [],
            |r| r.get(0),
        )?;
        Ok(current)
    }

    fn set_current_session(&self, name: Option<&str>) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE app_state SET current_session = ?1 WHERE id = 1",
            params![name],
        )?;
        Ok(())
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let metadata_json: String = row.get(6)?;
    let metadata: SessionMetadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
        log::warn!("Corrupt session metadata blob, treating as empty: {e}");
        SessionMetadata::default()
    });
    let status_str: String = row.get(3)?;

    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        status: SessionStatus::parse(&status_str).unwrap_or(SessionStatus::Active),
        description: row.get(4)?,
        external_task_ref: row.get(5)?,
        projects: metadata.projects,
        worktrees: metadata.worktrees,
        created_at: utc_from_epoch_seconds_lossy(row.get(7)?),
        updated_at: utc_from_epoch_seconds_lossy(row.get(8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::initialize_schema;
    use std::collections::BTreeMap;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        initialize_schema(&db).unwrap();
        db
    }

    fn sample_session(name: &str) -> Session {
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            path: PathBuf::from(format!("/tmp/sessions/{name}")),
            status: SessionStatus::Active,
            description: None,
            external_task_ref: None,
            projects: Vec::new(),
            worktrees: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_record() -> WorktreeRecord {
        WorktreeRecord {
            path: PathBuf::from("/tmp/sessions/demo/api"),
            branch: "demo".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_fetch_round_trip() {
        let db = test_db();
        db.create_session(&sample_session("demo")).unwrap();

        let session = db.get_session_by_name("demo").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.worktrees.is_empty());
        assert!(session.projects.is_empty());
    }

    #[test]
    fn missing_session_reads_as_none() {
        let db = test_db();
        assert!(db.get_session_by_name("ghost").unwrap().is_none());
    }

    #[test]
    fn add_worktree_record_is_insert_if_absent() {
        let db = test_db();
        db.create_session(&sample_session("demo")).unwrap();

        let first = db
            .add_worktree_record("demo", "api", &sample_record())
            .unwrap();
        assert_eq!(first, WorktreeWriteOutcome::Applied);

        let second = db
            .add_worktree_record("demo", "api", &sample_record())
            .unwrap();
        assert_eq!(second, WorktreeWriteOutcome::AlreadyPresent);

        let session = db.get_session_by_name("demo").unwrap().unwrap();
        assert_eq!(session.projects, vec!["api"]);
        assert_eq!(session.worktrees.len(), 1);
    }

    #[test]
    fn add_worktree_to_unknown_session_reports_missing() {
        let db = test_db();
        let outcome = db
            .add_worktree_record("ghost", "api", &sample_record())
            .unwrap();
        assert_eq!(outcome, WorktreeWriteOutcome::SessionMissing);
    }

    #[test]
    fn remove_worktree_record_keeps_projects_consistent() {
        let db = test_db();
        db.create_session(&sample_session("demo")).unwrap();
        db.add_worktree_record("demo", "api", &sample_record())
            .unwrap();

        let outcome = db.remove_worktree_record("demo", "api").unwrap();
        assert_eq!(outcome, WorktreeWriteOutcome::Applied);
        let session = db.get_session_by_name("demo").unwrap().unwrap();
        assert!(session.worktrees.is_empty());
        assert!(session.projects.is_empty());

        let again = db.remove_worktree_record("demo", "api").unwrap();
        assert_eq!(again, WorktreeWriteOutcome::NotPresent);
    }

    #[test]
    fn current_session_pointer_round_trip() {
        let db = test_db();
        assert_eq!(db.get_current_session().unwrap(), None);
        db.set_current_session(Some("demo")).unwrap();
        assert_eq!(db.get_current_session().unwrap(), Some("demo".to_string()));
        db.set_current_session(None).unwrap();
        assert_eq!(db.get_current_session().unwrap(), None);
    }
}
