//! Periodic task scheduler
//!
//! Runs background maintenance at fixed intervals.
//! Add new tasks by implementing the `PeriodicTask` trait.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::config::CONFIG;
use crate::services::{access_requests, audit};

/// Trait for periodic background tasks
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run
    fn interval(&self) -> Duration;

    /// Execute the task
    async fn run(&self, db: &DatabaseConnection) -> anyhow::Result<()>;
}

/// Start all periodic tasks
pub fn start_scheduler(db: Arc<DatabaseConnection>) {
    let tasks: Vec<Box<dyn PeriodicTask>> = vec![
        Box::new(AuditRetentionTask {
            every: Duration::from_secs(CONFIG.audit.cleanup_interval_secs.max(60)),
            default_days: CONFIG.audit.retention_days,
        }),
        Box::new(MembershipExpiryTask),
    ];

    for task in tasks {
        let db = db.clone();
        tokio::spawn(async move {
            run_task(task, db).await;
        });
    }

    tracing::info!("Periodic task scheduler started");
}

/// Run a single task on its interval
async fn run_task(task: Box<dyn PeriodicTask>, db: Arc<DatabaseConnection>) {
    let mut ticker = interval(task.interval());

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        tracing::debug!(task = task.name(), "Running periodic task");

        match task.run(&db).await {
            Ok(()) => {
                tracing::debug!(task = task.name(), "Periodic task completed");
            }
            Err(e) => {
                tracing::error!(task = task.name(), error = %e, "Periodic task failed");
            }
        }
    }
}

// ============================================================================
// Audit Retention Task
// ============================================================================

/// Prunes audit entries past their organization's retention window
pub struct AuditRetentionTask {
    pub every: Duration,
    pub default_days: i64,
}

#[async_trait]
impl PeriodicTask for AuditRetentionTask {
    fn name(&self) -> &'static str {
        "audit_retention"
    }

    fn interval(&self) -> Duration {
        self.every
    }

    async fn run(&self, db: &DatabaseConnection) -> anyhow::Result<()> {
        let deleted = audit::apply_retention(db, self.default_days).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Pruned audit log entries");
        }
        Ok(())
    }
}

// ============================================================================
// Membership Expiry Task
// ============================================================================

/// Drops group memberships whose `expires_at` has passed
pub struct MembershipExpiryTask;

#[async_trait]
impl PeriodicTask for MembershipExpiryTask {
    fn name(&self) -> &'static str {
        "membership_expiry"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    async fn run(&self, db: &DatabaseConnection) -> anyhow::Result<()> {
        let removed = access_requests::remove_expired_memberships(db, Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Removed expired group memberships");
        }
        Ok(())
    }
}
