use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bson::DateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::dao::DaoResult;
use crate::export::{OutputFormat, output_file_name};

use super::task_store::TaskRegistry;

const HOURLY: &str = "0 0 * * * *";
const DAILY: &str = "0 0 3 * * *";

/// Periodic cleanup of rendered outputs and abandoned task records.
///
/// Tasks still tracked by the registry are never touched.
pub struct RetentionSweeper {
    registry: Arc<TaskRegistry>,
    output_dir: PathBuf,
    retention: Duration,
    stale_after: Duration,
}

fn ago(duration: Duration) -> DateTime {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    DateTime::from_millis(DateTime::now().timestamp_millis().saturating_sub(millis))
}

impl RetentionSweeper {
    pub fn new(
        registry: Arc<TaskRegistry>,
        output_dir: impl Into<PathBuf>,
        retention: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            registry,
            output_dir: output_dir.into(),
            retention,
            stale_after,
        }
    }

    /// Deletes outputs of tasks finished more than `retention` ago and marks
    /// their records deleted. Returns the number of tasks swept.
    pub async fn sweep_expired_outputs(&self) -> DaoResult<usize> {
        let repo = self.registry.repository();
        let mut swept = 0;
        for mut task in repo.find_expired(ago(self.retention)).await? {
            if self.registry.is_live(&task.task_id) {
                continue;
            }
            self.remove_outputs(&task.task_id).await;
            task.deleted = true;
            repo.save(&task).await?;
            swept += 1;
        }
        if swept > 0 {
            info!(swept, "Expired outputs removed");
        }
        Ok(swept)
    }

    /// Deletes `PROCESSING` records older than `stale_after` that no pipeline owns.
    pub async fn sweep_stale_processing(&self) -> DaoResult<usize> {
        let repo = self.registry.repository();
        let mut removed = 0;
        for task in repo.find_stale_processing(ago(self.stale_after)).await? {
            if self.registry.is_live(&task.task_id) {
                continue;
            }
            if repo.delete(&task.task_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, "Removed stale processing tasks");
        }
        Ok(removed)
    }

    /// Marks failed tasks deleted.
    pub async fn sweep_failed(&self) -> DaoResult<usize> {
        let repo = self.registry.repository();
        let mut marked = 0;
        for mut task in repo.find_failed_not_deleted().await? {
            task.deleted = true;
            repo.save(&task).await?;
            marked += 1;
        }
        if marked > 0 {
            info!(marked, "Failed tasks marked deleted");
        }
        Ok(marked)
    }

    async fn remove_outputs(&self, task_id: &str) {
        for format in OutputFormat::ALL {
            let path = self.output_dir.join(output_file_name(task_id, format));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(task_id, path = %path.display(), "Output removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(task_id, path = %path.display(), error = %e, "Failed to remove output")
                }
            }
        }
    }

    /// Registers the hourly output sweep and the daily record sweeps, and
    /// starts the scheduler.
    pub async fn schedule(self: Arc<Self>) -> anyhow::Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;

        let sweeper = Arc::clone(&self);
        scheduler
            .add(Job::new_async(HOURLY, move |_id, _scheduler| {
                let sweeper = Arc::clone(&sweeper);
                Box::pin(async move {
                    if let Err(e) = sweeper.sweep_expired_outputs().await {
                        error!(error = %e, "Expired output sweep failed");
                    }
                })
            })?)
            .await?;

        let sweeper = Arc::clone(&self);
        scheduler
            .add(Job::new_async(DAILY, move |_id, _scheduler| {
                let sweeper = Arc::clone(&sweeper);
                Box::pin(async move {
                    if let Err(e) = sweeper.sweep_stale_processing().await {
                        error!(error = %e, "Stale task sweep failed");
                    }
                    if let Err(e) = sweeper.sweep_failed().await {
                        error!(error = %e, "Failed task sweep failed");
                    }
                })
            })?)
            .await?;

        scheduler.start().await?;
        info!(
            retention_hours = self.retention.as_secs() / 3600,
            stale_hours = self.stale_after.as_secs() / 3600,
            "Retention jobs scheduled"
        );
        Ok(scheduler)
    }
}
