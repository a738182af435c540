// Maintenance jobs - notification expiry, log retention and table statistics

use sqlx::PgPool;
use tracing::{info, warn};

use crate::notifications::{NotificationService, OverdueQuotation};

pub struct MaintenanceJobs;

impl MaintenanceJobs {
    /// Drop notifications whose `expires_at` has passed
    pub async fn cleanup_expired_notifications(notifications: &NotificationService) -> Result<u64, sqlx::Error> {
        let deleted = notifications.cleanup_expired().await?;
        if deleted > 0 {
            info!("Deleted {} expired notifications", deleted);
        }
        Ok(deleted)
    }

    /// Quotations with a pending task at least a day past its due date,
    /// one row per quotation using its oldest overdue task.
    pub async fn find_overdue_quotations(db_pool: &PgPool) -> Result<Vec<OverdueQuotation>, sqlx::Error> {
        sqlx::query_as::<_, OverdueQuotation>(
            r#"
            SELECT DISTINCT ON (q.id)
                q.id,
                q.quotation_number,
                q.client_name,
                q.total_amount,
                q.status,
                COALESCE(t.assigned_to_employee_id, q.created_by) AS assignee,
                FLOOR(EXTRACT(EPOCH FROM (NOW() - t.due_date)) / 86400)::bigint AS days_overdue
            FROM ai_tasks t
            JOIN quotations q ON q.id = t.quotation_id
            WHERE t.status = 'pending'
                AND t.due_date < NOW() - INTERVAL '1 day'
            ORDER BY q.id, t.due_date ASC
            "#,
        )
        .fetch_all(db_pool)
        .await
    }

    /// Notify assignees (and the business head when escalated) about overdue quotations
    pub async fn notify_overdue_quotations(
        db_pool: &PgPool,
        notifications: &NotificationService,
    ) -> Result<(usize, usize), sqlx::Error> {
        let overdue = Self::find_overdue_quotations(db_pool).await?;
        if overdue.is_empty() {
            return Ok((0, 0));
        }

        let sent = notifications.bulk_notify_overdue(&overdue).await;
        info!("Overdue scan: {} of {} quotations notified", sent, overdue.len());
        Ok((overdue.len(), sent))
    }

    /// Remove task generation history older than the retention window
    pub async fn cleanup_generation_log(db_pool: &PgPool, retention_days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM task_generation_log WHERE created_at < NOW() - make_interval(days => $1)",
        )
        .bind(retention_days)
        .execute(db_pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("Deleted {} task generation log entries older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }

    /// Read notifications past the retention window are no longer useful
    pub async fn cleanup_read_notifications(db_pool: &PgPool, retention_days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM notifications WHERE is_read = TRUE AND created_at < NOW() - make_interval(days => $1)",
        )
        .bind(retention_days)
        .execute(db_pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Refresh planner statistics on the busiest tables
    pub async fn analyze_tables(db_pool: &PgPool) {
        // ANALYZE, unlike VACUUM, may run on a pooled connection
        let tables = ["ai_tasks", "notifications", "leads", "quotations", "task_generation_log"];

        for table in tables {
            if let Err(e) = sqlx::query(&format!("ANALYZE {}", table)).execute(db_pool).await {
                warn!("Failed to ANALYZE {}: {}", table, e);
            }
        }
    }
}
