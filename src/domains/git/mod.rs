pub mod repository;
pub mod status;

pub use repository::{
    branch_exists, default_branch, is_head_detached, remote_branch_exists,
    resolve_parent_repository, validate_branch_name,
};
pub use status::{StatusSummary, parse_porcelain};
