use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Explicit engine configuration, threaded through constructors instead of
/// being read from process-global environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory under which session directories are created
    /// (`<sessions_root>/<session-name>/<project-name>` per worktree).
    pub sessions_root: PathBuf,
    /// Default timeout applied to external commands when the caller does not
    /// pass one.
    pub command_timeout: Duration,
    /// Verbose diagnostics in audit records.
    pub debug: bool,
}

impl Settings {
    pub fn new(sessions_root: PathBuf) -> Self {
        Self {
            sessions_root,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            debug: false,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn session_dir(&self, session_name: &str) -> PathBuf {
        self.sessions_root.join(session_name)
    }

    pub fn worktree_dir(&self, session_name: &str, project_name: &str) -> PathBuf {
        self.sessions_root.join(session_name).join(project_name)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("werkbank")
            .join("sessions");
        Self::new(root)
    }
}
