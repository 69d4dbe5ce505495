/// Summary of a `git status --porcelain` listing, used to classify worktree
/// health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub staged: bool,
    pub modified: bool,
    pub untracked: bool,
}

impl StatusSummary {
    pub fn is_clean(&self) -> bool {
        !self.staged && !self.modified && !self.untracked
    }
}

/// Parse porcelain v1 output. Each entry is `XY <path>` where X is the index
/// state and Y the working-tree state; `??` marks untracked files.
pub fn parse_porcelain(output: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in output.lines() {
        let mut chars = line.chars();
        let index = chars.next().unwrap_or(' ');
        let worktree = chars.next().unwrap_or(' ');

        if index == '?' && worktree == '?' {
            summary.untracked = true;
            continue;
        }
        if index != ' ' && index != '!' {
            summary.staged = true;
        }
        if worktree != ' ' && worktree != '!' {
            summary.modified = true;
        }
    }
    summary
}
