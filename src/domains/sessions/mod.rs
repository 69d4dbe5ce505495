pub mod db_projects;
pub mod db_sessions;
pub mod entity;
pub mod registry;
pub mod service;

pub use db_projects::ProjectMethods;
pub use db_sessions::SessionMethods;
pub use entity::{Project, Session, SessionMetadata, SessionStatus, WorktreeRecord};
pub use registry::SessionRegistry;
pub use service::{SessionManager, WorktreeListing};
