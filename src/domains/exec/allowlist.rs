use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// How a logical command name is resolved to something executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Well-known binary looked up on PATH.
    PathBinary,
    /// Script shipped by the project at `bin/<name>`.
    ProjectScript,
}

/// Fixed candidate table. Only entries that resolve to an existing executable
/// at construction time become usable; everything else is silently dropped.
const CANDIDATES: &[(&str, Resolution)] = &[
    ("git", Resolution::PathBinary),
    ("echo", Resolution::PathBinary),
    ("true", Resolution::PathBinary),
    ("sh", Resolution::PathBinary),
    ("sleep", Resolution::PathBinary),
    ("cp", Resolution::PathBinary),
    ("ln", Resolution::PathBinary),
    ("chmod", Resolution::PathBinary),
    ("mkdir", Resolution::PathBinary),
    ("touch", Resolution::PathBinary),
    ("make", Resolution::PathBinary),
    ("cargo", Resolution::PathBinary),
    ("npm", Resolution::PathBinary),
    ("pnpm", Resolution::PathBinary),
    ("yarn", Resolution::PathBinary),
    ("bundle", Resolution::PathBinary),
    ("pip", Resolution::PathBinary),
    ("uv", Resolution::PathBinary),
    ("setup", Resolution::ProjectScript),
    ("bootstrap", Resolution::ProjectScript),
];

/// Allow-list of executable commands, probed once at construction.
#[derive(Debug, Clone)]
pub struct Allowlist {
    resolved: BTreeMap<String, PathBuf>,
}

impl Allowlist {
    pub fn probe(project_root: &Path) -> Self {
        let mut resolved = BTreeMap::new();
        for (name, resolution) in CANDIDATES {
            let candidate = match resolution {
                Resolution::PathBinary => which::which(name).ok(),
                Resolution::ProjectScript => {
                    let script = project_root.join("bin").join(name);
                    is_executable_file(&script).then_some(script)
                }
            };
            if let Some(path) = candidate {
                resolved.insert((*name).to_string(), path);
            }
        }
        log::debug!("Allow-list probed: {} command(s) usable", resolved.len());
        Self { resolved }
    }

    pub fn allowed_commands(&self) -> BTreeSet<String> {
        self.resolved.keys().cloned().collect()
    }

    pub fn command_allowed(&self, argv: &[String]) -> bool {
        argv.first()
            .is_some_and(|name| self.resolved.contains_key(name))
    }

    /// Resolved absolute path for a whitelisted command name. Spawning the
    /// resolved path (not the bare name) keeps later PATH changes from
    /// redirecting an already-approved command.
    pub fn resolve(&self, name: &str) -> Option<&PathBuf> {
        self.resolved.get(name)
    }
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
