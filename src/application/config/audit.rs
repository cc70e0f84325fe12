use super::env_parse;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Default retention for entries without an organization-specific policy
    pub retention_days: i64,
    pub cleanup_interval_secs: u64,
}

impl AuditConfig {
    pub fn from_env() -> Self {
        Self {
            retention_days: env_parse("ELDER_AUDIT_RETENTION_DAYS", 90),
            cleanup_interval_secs: env_parse("ELDER_AUDIT_CLEANUP_INTERVAL_SECS", 86400),
        }
    }
}
