use super::connection::Database;

pub fn initialize_schema(db: &Database) -> anyhow::Result<()> {
    let conn = db.get_conn()?;

    // Session registry. `metadata` is a JSON blob holding the ordered project
    // list and the per-project worktree records; it is always read and
    // written whole, never patched field by field.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            status TEXT NOT NULL,  -- 'active' or 'archived'
            description TEXT,
            external_task_ref TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
        [],
    )?;

    // Registered projects. Rules are declared per project and stored as a
    // JSON array; read-only from the engine's perspective.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects (
            name TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            project_type TEXT NOT NULL DEFAULT 'git',
            default_branch TEXT NOT NULL DEFAULT 'main',
            rules TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Single-row table carrying the process-shared "current session" pointer.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            current_session TEXT
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO app_state (id, current_session) VALUES (1, NULL)",
        [],
    )?;

    apply_sessions_migrations(&conn)?;
    apply_projects_migrations(&conn)?;

    Ok(())
}

/// Apply migrations for the sessions table.
fn apply_sessions_migrations(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    // These migrations are idempotent - they silently fail if column already exists
    let _ = conn.execute("ALTER TABLE sessions ADD COLUMN description TEXT", []);
    let _ = conn.execute("ALTER TABLE sessions ADD COLUMN external_task_ref TEXT", []);
    Ok(())
}

/// Apply migrations for the projects table.
fn apply_projects_migrations(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let _ = conn.execute(
        "ALTER TABLE projects ADD COLUMN project_type TEXT DEFAULT 'git'",
        [],
    );
    let _ = conn.execute(
        "ALTER TABLE projects ADD COLUMN default_branch TEXT DEFAULT 'main'",
        [],
    );
    let _ = conn.execute(
        "UPDATE projects SET default_branch = 'main' WHERE default_branch IS NULL",
        [],
    );
    Ok(())
}
