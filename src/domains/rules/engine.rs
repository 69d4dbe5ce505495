use super::{CopyStrategy, Rule, template};
use crate::domains::exec::SecureExecutor;
use crate::domains::sessions::entity::Project;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything a rule application needs to know about where it is running.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub session_name: String,
    pub branch: String,
    pub worktree_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RuleApplicationReport {
    pub applied_count: usize,
    pub errors: Vec<String>,
}

impl RuleApplicationReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies a project's declared rules to a freshly created worktree. All
/// shell invocations route through the secure executor; a single failing
/// rule never aborts the remaining rules, since setup steps are commonly
/// independent.
pub struct RuleEngine<'a> {
    executor: &'a SecureExecutor,
}

impl<'a> RuleEngine<'a> {
    pub fn new(executor: &'a SecureExecutor) -> Self {
        Self { executor }
    }

    pub fn apply_rules(&self, project: &Project, ctx: &RuleContext) -> RuleApplicationReport {
        let mut report = RuleApplicationReport::default();

        for (index, rule) in project.rules.iter().enumerate() {
            let outcome = match rule {
                Rule::CopyFiles {
                    source,
                    strategy,
                    permissions,
                } => self.apply_copy_files(project, ctx, source, *strategy, *permissions),
                Rule::SetupCommands {
                    command,
                    environment,
                } => self.apply_setup_commands(project, ctx, command, environment),
                Rule::Template {
                    source,
                    destination,
                    process,
                } => self.apply_template(project, ctx, source, destination, *process),
            };

            match outcome {
                Ok(()) => report.applied_count += 1,
                Err(message) => {
                    log::warn!(
                        "Rule {index} ({}) failed for session '{}': {message}",
                        rule.type_name(),
                        ctx.session_name
                    );
                    report
                        .errors
                        .push(format!("rule {index} ({}): {message}", rule.type_name()));
                }
            }
        }

        log::info!(
            "Applied {}/{} rule(s) for project '{}' in session '{}'",
            report.applied_count,
            project.rules.len(),
            project.name,
            ctx.session_name
        );
        report
    }

    fn apply_copy_files(
        &self,
        project: &Project,
        ctx: &RuleContext,
        source: &str,
        strategy: CopyStrategy,
        permissions: Option<u32>,
    ) -> Result<(), String> {
        if strategy == CopyStrategy::Symlink && permissions.is_some() {
            // chmod on a symlink follows the link and would mutate the
            // project's own copy of the file.
            return Err("'permissions' cannot be combined with the symlink strategy".to_string());
        }

        let source_path = resolve_inside(&project.path, source)
            .ok_or_else(|| format!("source '{source}' escapes the project root"))?;
        if !source_path.exists() {
            return Err(format!("source '{source}' does not exist"));
        }

        let destination = ctx.worktree_path.join(source);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create '{}': {e}", parent.display()))?;
        }

        match strategy {
            CopyStrategy::Copy => copy_recursive(&source_path, &destination)?,
            CopyStrategy::Symlink => {
                if destination.exists() {
                    return Err(format!("destination '{}' already exists", destination.display()));
                }
                std::os::unix::fs::symlink(&source_path, &destination)
                    .map_err(|e| format!("failed to symlink '{source}': {e}"))?;
            }
        }

        if let Some(mode) = permissions {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&destination, std::fs::Permissions::from_mode(mode))
                .map_err(|e| format!("failed to chmod '{}': {e}", destination.display()))?;
        }

        log::debug!(
            "copy_files: '{source}' -> '{}' ({strategy:?})",
            destination.display()
        );
        Ok(())
    }

    fn apply_setup_commands(
        &self,
        project: &Project,
        ctx: &RuleContext,
        command: &[String],
        environment: &HashMap<String, String>,
    ) -> Result<(), String> {
        let mut env = environment.clone();
        env.insert("SESSION_NAME".to_string(), ctx.session_name.clone());
        env.insert("BRANCH_NAME".to_string(), ctx.branch.clone());
        env.insert(
            "WORKTREE_PATH".to_string(),
            ctx.worktree_path.display().to_string(),
        );
        env.insert("REPO_PATH".to_string(), project.path.display().to_string());

        let result = self
            .executor
            .execute(command, &env, None, None)
            .map_err(|e| e.to_string())?;

        if !result.success() {
            return Err(format!(
                "'{}' exited with {:?}: {}",
                result.command,
                result.exit_status,
                result.stderr.trim()
            ));
        }
        Ok(())
    }

    fn apply_template(
        &self,
        project: &Project,
        ctx: &RuleContext,
        source: &str,
        destination: &str,
        process: bool,
    ) -> Result<(), String> {
        let source_path = resolve_inside(&project.path, source)
            .ok_or_else(|| format!("source '{source}' escapes the project root"))?;
        let contents = std::fs::read_to_string(&source_path)
            .map_err(|e| format!("failed to read template '{source}': {e}"))?;

        let rendered = if process {
            let mut variables: HashMap<&'static str, String> = HashMap::new();
            variables.insert("session_name", ctx.session_name.clone());
            variables.insert("branch", ctx.branch.clone());
            variables.insert("worktree_path", ctx.worktree_path.display().to_string());
            variables.insert("project_name", project.name.clone());
            variables.insert("project_path", project.path.display().to_string());
            template::render(&contents, &variables)
        } else {
            contents
        };

        let target = resolve_inside(&ctx.worktree_path, destination)
            .ok_or_else(|| format!("destination '{destination}' escapes the worktree"))?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create '{}': {e}", parent.display()))?;
        }
        std::fs::write(&target, rendered)
            .map_err(|e| format!("failed to write '{}': {e}", target.display()))?;
        Ok(())
    }
}

/// Join `relative` onto `root` and reject anything resolving outside it.
fn resolve_inside(root: &Path, relative: &str) -> Option<PathBuf> {
    if Path::new(relative).is_absolute() {
        return None;
    }
    let joined = root.join(relative);
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    // Canonicalize the nearest existing ancestor so nonexistent sources still
    // get a traversal check.
    let check = joined.canonicalize().unwrap_or_else(|_| {
        let mut normalized = canonical_root.clone();
        for component in Path::new(relative).components() {
            match component {
                std::path::Component::ParentDir => {
                    normalized.pop();
                }
                std::path::Component::Normal(part) => normalized.push(part),
                _ => {}
            }
        }
        normalized
    });
    check.starts_with(&canonical_root).then_some(joined)
}

fn copy_recursive(source: &Path, destination: &Path) -> Result<(), String> {
    if source.is_file() {
        std::fs::copy(source, destination)
            .map_err(|e| format!("failed to copy '{}': {e}", source.display()))?;
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(|e| format!("failed to walk '{}': {e}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| format!("failed to relativize '{}': {e}", entry.path().display()))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| format!("failed to create '{}': {e}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("failed to create '{}': {e}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &target)
                .map_err(|e| format!("failed to copy '{}': {e}", entry.path().display()))?;
        }
    }
    Ok(())
}
