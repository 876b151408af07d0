use async_trait::async_trait;
use bson::{doc, DateTime};
use dashmap::DashMap;
use mongodb::Database;
use scribe_db::models::{Task, TaskStatus};

use super::base::{BaseDao, DaoResult};

/// Durable storage for task records.
#[async_trait]
pub trait TaskRepository: Send + Sync + 'static {
    /// Inserts or replaces the record with the same `task_id`.
    async fn save(&self, task: &Task) -> DaoResult<()>;

    async fn delete(&self, task_id: &str) -> DaoResult<bool>;

    async fn find_by_task_id(&self, task_id: &str) -> DaoResult<Option<Task>>;

    /// `PROCESSING` records created before `created_before`.
    async fn find_stale_processing(&self, created_before: DateTime) -> DaoResult<Vec<Task>>;

    /// Terminal, not yet deleted records finished before `finished_before`.
    async fn find_expired(&self, finished_before: DateTime) -> DaoResult<Vec<Task>>;

    async fn find_failed_not_deleted(&self) -> DaoResult<Vec<Task>>;
}

pub struct MongoTaskRepository {
    dao: BaseDao<Task>,
}

impl MongoTaskRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            dao: BaseDao::new(db, Task::COLLECTION),
        }
    }
}

#[async_trait]
impl TaskRepository for MongoTaskRepository {
    async fn save(&self, task: &Task) -> DaoResult<()> {
        self.dao
            .upsert_one(doc! { "task_id": &task.task_id }, task)
            .await
    }

    async fn delete(&self, task_id: &str) -> DaoResult<bool> {
        Ok(self.dao.hard_delete(doc! { "task_id": task_id }).await? > 0)
    }

    async fn find_by_task_id(&self, task_id: &str) -> DaoResult<Option<Task>> {
        self.dao.find_one(doc! { "task_id": task_id }).await
    }

    async fn find_stale_processing(&self, created_before: DateTime) -> DaoResult<Vec<Task>> {
        self.dao
            .find_many(
                doc! {
                    "status": TaskStatus::Processing.as_str(),
                    "create_time": { "$lt": created_before },
                },
                None,
            )
            .await
    }

    async fn find_expired(&self, finished_before: DateTime) -> DaoResult<Vec<Task>> {
        self.dao
            .find_many(
                doc! {
                    "deleted": false,
                    "status": {
                        "$in": [TaskStatus::Success.as_str(), TaskStatus::Failed.as_str()]
                    },
                    "finish_time": { "$lt": finished_before },
                },
                Some(doc! { "finish_time": 1 }),
            )
            .await
    }

    async fn find_failed_not_deleted(&self) -> DaoResult<Vec<Task>> {
        self.dao
            .find_many(
                doc! { "status": TaskStatus::Failed.as_str(), "deleted": false },
                None,
            )
            .await
    }
}

/// Process-local repository, used by tests and the `memory` database backend.
#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: DashMap<String, Task>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn collect(&self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn save(&self, task: &Task) -> DaoResult<()> {
        self.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, task_id: &str) -> DaoResult<bool> {
        Ok(self.tasks.remove(task_id).is_some())
    }

    async fn find_by_task_id(&self, task_id: &str) -> DaoResult<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|t| t.clone()))
    }

    async fn find_stale_processing(&self, created_before: DateTime) -> DaoResult<Vec<Task>> {
        Ok(self.collect(|t| t.status == TaskStatus::Processing && t.create_time < created_before))
    }

    async fn find_expired(&self, finished_before: DateTime) -> DaoResult<Vec<Task>> {
        let mut tasks = self.collect(|t| {
            !t.deleted
                && t.status.is_terminal()
                && t.finish_time.is_some_and(|f| f < finished_before)
        });
        tasks.sort_by_key(|t| t.finish_time);
        Ok(tasks)
    }

    async fn find_failed_not_deleted(&self) -> DaoResult<Vec<Task>> {
        Ok(self.collect(|t| t.status == TaskStatus::Failed && !t.deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ago(hours: i64) -> DateTime {
        DateTime::from_millis(DateTime::now().timestamp_millis() - hours * 3600 * 1000)
    }

    #[tokio::test]
    async fn save_is_an_upsert_by_task_id() {
        let repo = MemoryTaskRepository::new();
        let mut task = Task::processing("t1");
        repo.save(&task).await.unwrap();
        task.finish(TaskStatus::Success, Some("{}".to_string()), None);
        repo.save(&task).await.unwrap();

        assert_eq!(repo.len(), 1);
        let stored = repo.find_by_task_id("t1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let repo = MemoryTaskRepository::new();
        repo.save(&Task::processing("t1")).await.unwrap();
        assert!(repo.delete("t1").await.unwrap());
        assert!(!repo.delete("t1").await.unwrap());
        assert!(repo.find_by_task_id("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn age_queries_filter_by_status_and_time() {
        let repo = MemoryTaskRepository::new();

        let mut stale = Task::processing("stale");
        stale.create_time = ago(3);
        repo.save(&stale).await.unwrap();
        repo.save(&Task::processing("fresh")).await.unwrap();

        let mut old_done = Task::processing("old_done");
        old_done.finish(TaskStatus::Success, None, None);
        old_done.finish_time = Some(ago(48));
        repo.save(&old_done).await.unwrap();

        let mut old_failed = Task::processing("old_failed");
        old_failed.finish(TaskStatus::Failed, None, None);
        old_failed.finish_time = Some(ago(30));
        old_failed.deleted = true;
        repo.save(&old_failed).await.unwrap();

        let mut new_failed = Task::processing("new_failed");
        new_failed.finish(TaskStatus::Failed, None, None);
        repo.save(&new_failed).await.unwrap();

        let stale_ids: Vec<String> = repo
            .find_stale_processing(ago(1))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(stale_ids, vec!["stale".to_string()]);

        let expired: Vec<String> = repo
            .find_expired(ago(24))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(expired, vec!["old_done".to_string()]);

        let failed: Vec<String> = repo
            .find_failed_not_deleted()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(failed, vec!["new_failed".to_string()]);
    }
}
