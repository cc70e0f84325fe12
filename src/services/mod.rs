pub mod access_requests;
pub mod audit;
pub mod dependency_graph;
pub mod hierarchy;
pub mod rbac;
pub mod scheduler;
pub mod scim;
pub mod security;

pub use audit::{AuditEvent, AuditService};
pub use rbac::PermissionSet;
pub use security::*;
