use crate::domains::rules::Rule;
use crate::domains::sessions::entity::Project;
use crate::infrastructure::database::Database;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use std::path::PathBuf;

pub trait ProjectMethods {
    fn upsert_project(&self, project: &Project) -> Result<()>;
    fn get_project(&self, name: &str) -> Result<Option<Project>>;
    fn list_projects(&self) -> Result<Vec<Project>>;
    fn delete_project(&self, name: &str) -> Result<bool>;
}

impl ProjectMethods for Database {
    fn upsert_project(&self, project: &Project) -> Result<()> {
        let conn = self.get_conn()?;
        let rules = serde_json::to_string(&project.rules)?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO projects (name, path, project_type, default_branch, rules,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(name) DO UPDATE SET
                path = excluded.path,
                project_type = excluded.project_type,
                default_branch = excluded.default_branch,
                rules = excluded.rules,
                updated_at = excluded.updated_at",
            params![
                project.name,
                project.path.to_string_lossy(),
                project.project_type,
                project.default_branch,
                rules,
                now,
            ],
        )?;
        Ok(())
    }

    fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, path, project_type, default_branch, rules
             FROM projects WHERE name = ?1",
        )?;
        let project = stmt.query_row(params![name], row_to_project).optional()?;
        Ok(project)
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, path, project_type, default_branch, rules
             FROM projects ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_project)?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    fn delete_project(&self, name: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute("DELETE FROM projects WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    }
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    let rules_json: String = row.get(4)?;
    let rules: Vec<Rule> = serde_json::from_str(&rules_json).unwrap_or_else(|e| {
        log::warn!("Corrupt project rules blob, ignoring rules: {e}");
        Vec::new()
    });

    Ok(Project {
        name: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        project_type: row.get(2)?,
        default_branch: row.get(3)?,
        rules,
    })
}
