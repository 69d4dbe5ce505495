pub mod orchestrator;
pub mod state;

pub use orchestrator::WorktreeOrchestrator;
pub use state::{WorktreeHealth, WorktreeStatus};
