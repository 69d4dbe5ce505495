pub mod exec;
pub mod git;
pub mod rules;
pub mod sessions;
pub mod worktrees;
