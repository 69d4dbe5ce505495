use super::state::{WorktreeHealth, WorktreeStatus};
use crate::domains::exec::{CommandResult, SecureExecutor};
use crate::domains::git;
use crate::domains::sessions::entity::{Project, WorktreeRecord};
use crate::errors::{WerkbankError, WorktreeDiagnostics};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Creates, inspects and removes git worktrees for (project, session)
/// pairs. Every external git process goes through the secure executor;
/// in-process queries (branch existence, gitdir recovery) use libgit2.
pub struct WorktreeOrchestrator<'a> {
    executor: &'a SecureExecutor,
}

impl<'a> WorktreeOrchestrator<'a> {
    pub fn new(executor: &'a SecureExecutor) -> Self {
        Self { executor }
    }

    fn git(&self, args: &[&str]) -> Result<CommandResult, WerkbankError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("git".to_string());
        argv.extend(args.iter().map(|s| s.to_string()));
        self.executor.execute(&argv, &HashMap::new(), None, None)
    }

    /// Resolve the branch a new worktree should check out: an explicit
    /// argument wins; `remote:<name>` fetches and sets up tracking first;
    /// with nothing given, the session name doubles as the branch name.
    pub fn resolve_branch(
        &self,
        project: &Project,
        explicit: Option<&str>,
        session_name: &str,
    ) -> Result<String, WerkbankError> {
        let branch = match explicit {
            Some(spec) => match spec.strip_prefix("remote:") {
                Some(remote) => {
                    self.setup_tracking_branch(project, remote)?;
                    remote.to_string()
                }
                None => spec.to_string(),
            },
            None => session_name.to_string(),
        };

        git::validate_branch_name(&branch)
            .map_err(|e| WerkbankError::invalid_argument("branch", e))?;
        Ok(branch)
    }

    fn setup_tracking_branch(
        &self,
        project: &Project,
        remote_branch: &str,
    ) -> Result<(), WerkbankError> {
        git::validate_branch_name(remote_branch)
            .map_err(|e| WerkbankError::invalid_argument("branch", e))?;

        let repo = project.path.to_string_lossy().to_string();
        let fetch = self.git(&["-C", &repo, "fetch", "origin", remote_branch])?;
        if !fetch.success() {
            return Err(WerkbankError::CommandFailed {
                command: fetch.command,
                message: format!("fetch failed: {}", fetch.stderr.trim()),
            });
        }

        let already_local = git::branch_exists(&project.path, remote_branch).unwrap_or(false);
        if !already_local {
            let track = self.git(&[
                "-C",
                &repo,
                "branch",
                "--track",
                remote_branch,
                &format!("origin/{remote_branch}"),
            ])?;
            if !track.success() {
                return Err(WerkbankError::CommandFailed {
                    command: track.command,
                    message: format!("tracking branch setup failed: {}", track.stderr.trim()),
                });
            }
        }
        Ok(())
    }

    /// Create the worktree on disk. A prior failed run may have left git
    /// metadata or a directory behind, so stale state is reconciled first.
    /// On failure the partially created directory is deleted before the
    /// diagnostic error is raised.
    pub fn create_worktree(
        &self,
        project: &Project,
        branch: &str,
        target: &Path,
    ) -> Result<WorktreeRecord, WerkbankError> {
        self.reconcile_stale_state(project, target);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WerkbankError::io("create_dir", parent.display(), e))?;
        }

        let repo = project.path.to_string_lossy().to_string();
        let target_str = target.to_string_lossy().to_string();
        let branch_is_local = git::branch_exists(&project.path, branch).unwrap_or(false);

        let args: Vec<&str> = if branch_is_local {
            vec!["-C", &repo, "worktree", "add", &target_str, branch]
        } else {
            vec![
                "-C",
                &repo,
                "worktree",
                "add",
                "-b",
                branch,
                &target_str,
                &project.default_branch,
            ]
        };

        let result = match self.git(&args) {
            Ok(result) => result,
            Err(e) => {
                self.cleanup_partial_create(target);
                return Err(creation_error(
                    format!("git invocation failed: {e}"),
                    &args,
                    self.executor.project_root(),
                    target,
                    None,
                ));
            }
        };

        if !result.success() {
            self.cleanup_partial_create(target);
            return Err(creation_error(
                format!("git worktree add exited with {:?}", result.exit_status),
                &args,
                self.executor.project_root(),
                target,
                Some(&result),
            ));
        }

        log::info!(
            "Created worktree for project '{}' at {} on branch '{branch}'",
            project.name,
            target.display()
        );

        Ok(WorktreeRecord {
            path: target.to_path_buf(),
            branch: branch.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Clear leftovers from an earlier incomplete run: prune stale
    /// registrations, force-remove any registration still pointing at the
    /// target, and delete whatever directory remains.
    fn reconcile_stale_state(&self, project: &Project, target: &Path) {
        let repo = project.path.to_string_lossy().to_string();
        let target_str = target.to_string_lossy().to_string();

        match self.git(&["-C", &repo, "worktree", "prune"]) {
            Ok(result) if !result.success() => {
                log::warn!("worktree prune failed: {}", result.stderr.trim());
            }
            Err(e) => log::warn!("worktree prune failed: {e}"),
            _ => {}
        }

        match self.git(&["-C", &repo, "worktree", "remove", "--force", &target_str]) {
            Ok(result) if !result.success() => {
                // Expected when nothing is registered at the target.
                log::debug!(
                    "stale worktree removal at {target_str}: {}",
                    result.stderr.trim()
                );
            }
            Err(e) => log::warn!("stale worktree removal failed: {e}"),
            _ => log::info!("Removed stale worktree registration at {target_str}"),
        }

        if target.exists() {
            log::warn!(
                "Leftover directory at {} from a prior run, deleting",
                target.display()
            );
            if let Err(e) = std::fs::remove_dir_all(target) {
                log::warn!("Failed to delete leftover directory: {e}");
            }
        }
    }

    fn cleanup_partial_create(&self, target: &Path) {
        if target.exists()
            && let Err(e) = std::fs::remove_dir_all(target)
        {
            log::warn!(
                "Failed to roll back partially created worktree {}: {e}",
                target.display()
            );
        }
    }

    /// Remove the git-level registration (best effort) and then the
    /// directory, unconditionally. When the owning project has been
    /// deregistered, the parent repository is recovered through the
    /// worktree's `.git` gitdir pointer.
    pub fn remove_worktree(&self, project_path: Option<&Path>, worktree_path: &Path) {
        let repo = project_path
            .map(Path::to_path_buf)
            .or_else(|| git::resolve_parent_repository(worktree_path));

        match repo {
            Some(repo) => {
                let repo_str = repo.to_string_lossy().to_string();
                let target_str = worktree_path.to_string_lossy().to_string();
                match self.git(&["-C", &repo_str, "worktree", "remove", "--force", &target_str]) {
                    Ok(result) if !result.success() => {
                        log::warn!(
                            "git worktree remove failed (continuing cleanup): {}",
                            result.stderr.trim()
                        );
                    }
                    Err(e) => {
                        log::warn!("git worktree remove failed (continuing cleanup): {e}");
                    }
                    _ => {}
                }
                // Drop any administrative files the removal left behind.
                if let Ok(result) = self.git(&["-C", &repo_str, "worktree", "prune"])
                    && !result.success()
                {
                    log::debug!("worktree prune after removal: {}", result.stderr.trim());
                }
            }
            None => {
                log::warn!(
                    "No parent repository found for {}; deleting directory only",
                    worktree_path.display()
                );
            }
        }

        if worktree_path.exists()
            && let Err(e) = std::fs::remove_dir_all(worktree_path)
        {
            log::warn!(
                "Failed to delete worktree directory {}: {e}",
                worktree_path.display()
            );
        }
    }

    /// Classify worktree health. Computed per call; the registry's cached
    /// path/branch are never trusted for liveness.
    pub fn worktree_status(&self, path: &Path) -> WorktreeStatus {
        if !path.exists() {
            return WorktreeStatus::Missing;
        }
        if !path.join(".git").exists() {
            return WorktreeStatus::Invalid;
        }

        let path_str = path.to_string_lossy().to_string();
        match self.git(&["-C", &path_str, "status", "--porcelain"]) {
            Ok(result) if result.success() => {
                WorktreeStatus::from_summary(git::parse_porcelain(&result.stdout))
            }
            Ok(result) => {
                log::warn!(
                    "git status failed for {}: {}",
                    path.display(),
                    result.stderr.trim()
                );
                WorktreeStatus::Error
            }
            Err(e) => {
                log::warn!("git status failed for {}: {e}", path.display());
                WorktreeStatus::Error
            }
        }
    }

    pub fn validate_worktree(&self, path: &Path) -> WorktreeHealth {
        let mut issues = Vec::new();

        if !path.exists() {
            issues.push(format!(
                "worktree directory does not exist: {}",
                path.display()
            ));
            return WorktreeHealth {
                valid: false,
                issues,
            };
        }

        if !path.join(".git").exists() {
            issues.push("not a valid git worktree (no .git marker)".to_string());
            return WorktreeHealth {
                valid: false,
                issues,
            };
        }

        if self.worktree_status(path) == WorktreeStatus::Error {
            issues.push("unable to query git status".to_string());
        }

        match git::is_head_detached(path) {
            Ok(true) => issues.push("HEAD is detached".to_string()),
            Ok(false) => {}
            Err(e) => issues.push(format!("unable to inspect HEAD: {e}")),
        }

        WorktreeHealth {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// Sweep the sessions root for worktree directories no session claims
    /// and remove them, git registration included. Suppressed failures are
    /// logged, never raised.
    pub fn sweep_orphans(&self, sessions_root: &Path, registered: &HashSet<PathBuf>) {
        let Ok(session_dirs) = std::fs::read_dir(sessions_root) else {
            return;
        };

        for session_dir in session_dirs.flatten() {
            if !session_dir.path().is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(session_dir.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
                if registered.contains(&canonical) {
                    continue;
                }
                log::info!(
                    "Removing orphaned worktree {} (no matching registry entry)",
                    path.display()
                );
                self.remove_worktree(None, &path);
            }
        }
    }
}

fn creation_error(
    message: String,
    args: &[&str],
    cwd: &Path,
    target: &Path,
    result: Option<&CommandResult>,
) -> WerkbankError {
    let stderr = result.map(|r| r.stderr.clone()).unwrap_or_default();
    let mut hints = Vec::new();
    let lowered = stderr.to_lowercase();
    if lowered.contains("not a git repository") {
        hints.push("source project is not a git repository".to_string());
    }
    if lowered.contains("already exists") {
        hints.push("target path or branch already exists".to_string());
    }
    if lowered.contains("invalid reference") || lowered.contains("unknown revision") {
        hints.push("base branch does not exist in the repository".to_string());
    }

    let diagnostics = WorktreeDiagnostics {
        command: std::iter::once("git")
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" "),
        cwd: cwd.display().to_string(),
        target_path: target.display().to_string(),
        stdout: result.map(|r| r.stdout.clone()).unwrap_or_default(),
        stderr,
        exit_status: result.and_then(|r| r.exit_status),
        hints,
    };

    WerkbankError::WorktreeCreationFailed {
        message,
        diagnostics: Box::new(diagnostics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use std::time::Duration;
    use tempfile::TempDir;

    fn init_repo(path: &Path) {
        StdCommand::new("git")
            .args(["init"])
            .current_dir(path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(path)
            .output()
            .unwrap();
        std::fs::write(path.join("README.md"), "Initial").unwrap();
        StdCommand::new("git")
            .args(["add", "."])
            .current_dir(path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "Initial"])
            .current_dir(path)
            .output()
            .unwrap();
    }

    fn fixture() -> (TempDir, Project, SecureExecutor) {
        let _ = env_logger::builder().is_test(true).try_init();
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);
        let default_branch = crate::domains::git::default_branch(&repo).unwrap();
        let project = Project {
            name: "api".to_string(),
            path: repo,
            project_type: "git".to_string(),
            default_branch,
            rules: Vec::new(),
        };
        let executor =
            SecureExecutor::new(tmp.path().to_path_buf(), Duration::from_secs(60), false);
        (tmp, project, executor)
    }

    #[test]
    fn create_worktree_with_new_branch() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");

        let record = orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();
        assert_eq!(record.branch, "demo");
        assert!(target.join(".git").is_file());
        assert_eq!(orchestrator.worktree_status(&target), WorktreeStatus::Clean);
    }

    #[test]
    fn create_worktree_checks_out_existing_branch() {
        let (tmp, project, executor) = fixture();
        StdCommand::new("git")
            .args(["branch", "feature-x"])
            .current_dir(&project.path)
            .output()
            .unwrap();

        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");
        let record = orchestrator
            .create_worktree(&project, "feature-x", &target)
            .unwrap();
        assert_eq!(record.branch, "feature-x");
        assert!(target.exists());
    }

    #[test]
    fn create_failure_rolls_back_and_carries_diagnostics() {
        let (tmp, mut project, executor) = fixture();
        project.default_branch = "no-such-base".to_string();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");

        let err = orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap_err();
        assert!(!target.exists(), "partial directory must be rolled back");
        match err {
            WerkbankError::WorktreeCreationFailed { diagnostics, .. } => {
                assert!(diagnostics.command.contains("worktree add"));
                assert!(!diagnostics.stderr.is_empty());
            }
            other => panic!("expected WorktreeCreationFailed, got {other:?}"),
        }
    }

    #[test]
    fn create_recovers_from_stale_registration() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");

        orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();
        // Simulate an incomplete prior removal: directory gone, git metadata kept.
        std::fs::remove_dir_all(&target).unwrap();

        let record = orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();
        assert_eq!(record.branch, "demo");
        assert!(target.exists());
    }

    #[test]
    fn remove_worktree_cleans_directory_and_registration() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");
        orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();

        orchestrator.remove_worktree(Some(&project.path), &target);
        assert!(!target.exists());
        assert_eq!(
            orchestrator.worktree_status(&target),
            WorktreeStatus::Missing
        );
    }

    #[test]
    fn remove_worktree_recovers_repo_from_gitdir_pointer() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");
        orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();

        // Project deregistered: removal falls back to the gitdir pointer.
        orchestrator.remove_worktree(None, &target);
        assert!(!target.exists());
    }

    #[test]
    fn status_classification_precedence() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");
        orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();

        std::fs::write(target.join("new.txt"), "x").unwrap();
        assert_eq!(
            orchestrator.worktree_status(&target),
            WorktreeStatus::Untracked
        );

        std::fs::write(target.join("README.md"), "changed").unwrap();
        assert_eq!(
            orchestrator.worktree_status(&target),
            WorktreeStatus::Modified
        );

        StdCommand::new("git")
            .args(["add", "README.md"])
            .current_dir(&target)
            .output()
            .unwrap();
        assert_eq!(
            orchestrator.worktree_status(&target),
            WorktreeStatus::Staged
        );
    }

    #[test]
    fn validate_reports_missing_git_marker_without_raising() {
        let (tmp, _project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let plain_dir = tmp.path().join("plain");
        std::fs::create_dir_all(&plain_dir).unwrap();

        let health = orchestrator.validate_worktree(&plain_dir);
        assert!(!health.valid);
        assert!(
            health.issues[0].contains("not a valid git worktree"),
            "issues: {:?}",
            health.issues
        );
    }

    #[test]
    fn validate_healthy_worktree() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let target = tmp.path().join("sessions/demo/api");
        orchestrator
            .create_worktree(&project, "demo", &target)
            .unwrap();

        let health = orchestrator.validate_worktree(&target);
        assert!(health.valid, "issues: {:?}", health.issues);
    }

    #[test]
    fn sweep_orphans_removes_unregistered_directories() {
        let (tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let sessions_root = tmp.path().join("sessions");

        let kept = sessions_root.join("demo/api");
        orchestrator
            .create_worktree(&project, "demo", &kept)
            .unwrap();
        let orphan = sessions_root.join("ghost/api");
        std::fs::create_dir_all(&orphan).unwrap();

        let registered: HashSet<PathBuf> =
            std::iter::once(kept.canonicalize().unwrap()).collect();
        orchestrator.sweep_orphans(&sessions_root, &registered);

        assert!(kept.exists(), "registered worktree must survive the sweep");
        assert!(!orphan.exists(), "orphan must be removed");
    }

    #[test]
    fn resolve_branch_defaults_to_session_name() {
        let (_tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let branch = orchestrator
            .resolve_branch(&project, None, "demo")
            .unwrap();
        assert_eq!(branch, "demo");
    }

    #[test]
    fn resolve_branch_prefers_explicit_argument() {
        let (_tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let branch = orchestrator
            .resolve_branch(&project, Some("feature/login"), "demo")
            .unwrap();
        assert_eq!(branch, "feature/login");
    }

    #[test]
    fn resolve_branch_tracks_remote_branches() {
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        init_repo(&origin);
        StdCommand::new("git")
            .args(["branch", "feature"])
            .current_dir(&origin)
            .output()
            .unwrap();

        let repo = tmp.path().join("repo");
        StdCommand::new("git")
            .args(["clone", origin.to_str().unwrap(), repo.to_str().unwrap()])
            .current_dir(tmp.path())
            .output()
            .unwrap();

        let project = Project {
            name: "api".to_string(),
            path: repo.clone(),
            project_type: "git".to_string(),
            default_branch: crate::domains::git::default_branch(&repo).unwrap(),
            rules: Vec::new(),
        };
        let executor =
            SecureExecutor::new(tmp.path().to_path_buf(), Duration::from_secs(60), false);
        let orchestrator = WorktreeOrchestrator::new(&executor);

        assert!(!crate::domains::git::branch_exists(&repo, "feature").unwrap());
        let branch = orchestrator
            .resolve_branch(&project, Some("remote:feature"), "demo")
            .unwrap();
        assert_eq!(branch, "feature");
        assert!(crate::domains::git::branch_exists(&repo, "feature").unwrap());

        let target = tmp.path().join("sessions/demo/api");
        let record = orchestrator
            .create_worktree(&project, &branch, &target)
            .unwrap();
        assert_eq!(record.branch, "feature");
        assert!(target.join(".git").is_file());
    }

    #[test]
    fn resolve_branch_rejects_malformed_names() {
        let (_tmp, project, executor) = fixture();
        let orchestrator = WorktreeOrchestrator::new(&executor);
        let err = orchestrator
            .resolve_branch(&project, Some("..bad"), "demo")
            .unwrap_err();
        assert!(matches!(err, WerkbankError::InvalidArgument { .. }));
    }
}
