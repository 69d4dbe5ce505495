use anyhow::{Result, anyhow};
use git2::{BranchType, Repository};
use std::path::{Path, PathBuf};

pub fn branch_exists(repo_path: &Path, branch_name: &str) -> Result<bool> {
    let repo = Repository::open(repo_path)?;

    match repo.find_branch(branch_name, BranchType::Local) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
        // Treat corrupted branches as non-existent
        Err(e)
            if e.code() == git2::ErrorCode::InvalidSpec
                || e.code() == git2::ErrorCode::GenericError =>
        {
            Ok(false)
        }
        Err(e) => Err(anyhow!("Error checking branch existence: {e}")),
    }
}

pub fn remote_branch_exists(repo_path: &Path, branch_name: &str) -> Result<bool> {
    let repo = Repository::open(repo_path)?;
    let qualified = format!("origin/{branch_name}");
    match repo.find_branch(&qualified, BranchType::Remote) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
        Err(e) => Err(anyhow!("Error checking remote branch existence: {e}")),
    }
}

/// Resolve the branch a new worktree should be based on when none is given:
/// origin/HEAD when a remote exists, otherwise the checked-out branch.
pub fn default_branch(repo_path: &Path) -> Result<String> {
    let repo = Repository::open(repo_path)?;

    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(target) = reference.symbolic_target()
        && let Some(branch) = target.strip_prefix("refs/remotes/origin/")
    {
        return Ok(branch.to_string());
    }

    let head = repo.head()?;
    head.shorthand()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("HEAD does not point to a branch"))
}

pub fn is_head_detached(worktree_path: &Path) -> Result<bool> {
    let repo = Repository::open(worktree_path)?;
    Ok(repo.head_detached()?)
}

/// Recover the parent repository root from a worktree's `.git` file, which is
/// a one-line pointer `gitdir: <repo>/.git/worktrees/<name>`. Used when the
/// owning project has been deregistered but the worktree still needs removal.
pub fn resolve_parent_repository(worktree_path: &Path) -> Option<PathBuf> {
    let git_file = worktree_path.join(".git");
    if !git_file.is_file() {
        return None;
    }

    let contents = std::fs::read_to_string(&git_file).ok()?;
    let gitdir = contents.trim().strip_prefix("gitdir:")?.trim();
    let gitdir = PathBuf::from(gitdir);

    // <repo>/.git/worktrees/<name> -> <repo>
    let worktrees_dir = gitdir.parent()?;
    if worktrees_dir.file_name()? != "worktrees" {
        return None;
    }
    let dot_git = worktrees_dir.parent()?;
    if dot_git.file_name()? != ".git" {
        return None;
    }
    dot_git.parent().map(Path::to_path_buf)
}

pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("Branch name cannot be empty"));
    }
    if name.contains("..") || name.contains('\0') || name.contains('\\') {
        return Err(anyhow!("Invalid branch name"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.');
    if !name.chars().all(allowed) {
        return Err(anyhow!("Branch name contains invalid characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
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

    #[test]
    fn branch_existence() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());

        let head = default_branch(tmp.path()).unwrap();
        assert!(branch_exists(tmp.path(), &head).unwrap());
        assert!(!branch_exists(tmp.path(), "no-such-branch").unwrap());
    }

    #[test]
    fn branch_name_validation() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/x").is_ok());
        assert!(validate_branch_name("release-1.2.3").is_ok());
        assert!(validate_branch_name("..bad").is_err());
        assert!(validate_branch_name("bad\\name").is_err());
        assert!(validate_branch_name("").is_err());
    }

    #[test]
    fn gitdir_pointer_resolves_parent_repo() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let worktree = tmp.path().join("wt");

        StdCommand::new("git")
            .args([
                "worktree",
                "add",
                "-b",
                "side",
                worktree.to_str().unwrap(),
            ])
            .current_dir(tmp.path())
            .output()
            .unwrap();

        let parent = resolve_parent_repository(&worktree).unwrap();
        assert_eq!(
            parent.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn gitdir_pointer_absent_for_plain_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(resolve_parent_repository(tmp.path()).is_none());
    }
}
