pub mod allowlist;
pub mod environment;
pub mod executor;

pub use allowlist::Allowlist;
pub use executor::{CommandResult, SecureExecutor};
