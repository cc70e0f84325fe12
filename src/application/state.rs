pub use crate::db::DbConn;
use crate::services::audit::AuditService;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbConn,
    pub audit: AuditService,
}

impl AppState {
    pub fn new(db: DbConn) -> Self {
        let audit = AuditService::new(db.clone());
        Self { db, audit }
    }
}
