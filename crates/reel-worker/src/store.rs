//! In-memory job and batch stores.
//!
//! Both stores keep a fixed number of entries and evict the oldest insert
//! once full. Updating an existing key does not change its age.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use reel_models::{BatchStatus, JobId, JobSnapshot};
use tokio::sync::RwLock;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put_job(&self, snapshot: JobSnapshot);
    async fn get_job(&self, job_id: &JobId) -> Option<JobSnapshot>;
    /// Returns the removed snapshot, if any.
    async fn delete_job(&self, job_id: &JobId) -> Option<JobSnapshot>;
    /// Snapshots, oldest first.
    async fn list_jobs(&self) -> Vec<JobSnapshot>;
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn put_batch(&self, status: BatchStatus);
    async fn get_batch(&self, batch_id: &str) -> Option<BatchStatus>;
    async fn delete_batch(&self, batch_id: &str) -> Option<BatchStatus>;
    /// Batches, oldest first.
    async fn list_batches(&self) -> Vec<BatchStatus>;
}

struct Entries<V> {
    values: HashMap<String, V>,
    order: VecDeque<String>,
}

/// Capacity-bounded map shared by the job and batch stores.
pub struct MemoryStore<V> {
    capacity: usize,
    inner: RwLock<Entries<V>>,
}

impl<V: Clone + Send + Sync> MemoryStore<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Entries {
                values: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn put(&self, key: &str, value: V) {
        let mut entries = self.inner.write().await;
        if entries.values.insert(key.to_string(), value).is_none() {
            entries.order.push_back(key.to_string());
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.values.remove(&oldest);
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Remove `key`; its slot no longer counts toward capacity.
    pub async fn delete(&self, key: &str) -> Option<V> {
        let mut entries = self.inner.write().await;
        let removed = entries.values.remove(key)?;
        entries.order.retain(|k| k != key);
        Some(removed)
    }

    pub async fn values(&self) -> Vec<V> {
        let entries = self.inner.read().await;
        entries
            .order
            .iter()
            .filter_map(|key| entries.values.get(key).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.values.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub type MemoryJobStore = MemoryStore<JobSnapshot>;
pub type MemoryBatchStore = MemoryStore<BatchStatus>;

#[async_trait]
impl JobStore for MemoryStore<JobSnapshot> {
    async fn put_job(&self, snapshot: JobSnapshot) {
        let key = snapshot.job_id.as_str().to_string();
        self.put(&key, snapshot).await;
    }

    async fn get_job(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.get(job_id.as_str()).await
    }

    async fn delete_job(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.delete(job_id.as_str()).await
    }

    async fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.values().await
    }
}

#[async_trait]
impl BatchStore for MemoryStore<BatchStatus> {
    async fn put_batch(&self, status: BatchStatus) {
        let key = status.batch_id.clone();
        self.put(&key, status).await;
    }

    async fn get_batch(&self, batch_id: &str) -> Option<BatchStatus> {
        self.get(batch_id).await
    }

    async fn delete_batch(&self, batch_id: &str) -> Option<BatchStatus> {
        self.delete(batch_id).await
    }

    async fn list_batches(&self) -> Vec<BatchStatus> {
        self.values().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oldest_entry_is_evicted() {
        let store = MemoryBatchStore::new(2);
        for id in ["a", "b", "c"] {
            store.put_batch(BatchStatus::new(id, id, Vec::new())).await;
        }

        assert_eq!(store.len().await, 2);
        assert!(store.get_batch("a").await.is_none());
        let ids: Vec<_> = store
            .list_batches()
            .await
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_update_keeps_position() {
        let store = MemoryJobStore::new(2);
        let first = JobSnapshot::new(JobId::from_string("first"));
        let second = JobSnapshot::new(JobId::from_string("second"));
        store.put_job(first.clone()).await;
        store.put_job(second).await;

        let mut updated = first;
        updated.progress = 0.5;
        store.put_job(updated).await;

        let jobs = store.list_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id.as_str(), "first");
        assert_eq!(jobs[0].progress, 0.5);
    }

    #[tokio::test]
    async fn test_deleted_job_is_gone() {
        let store = MemoryJobStore::new(2);
        let kept = JobSnapshot::new(JobId::from_string("kept"));
        let dropped = JobSnapshot::new(JobId::from_string("dropped"));
        store.put_job(kept).await;
        store.put_job(dropped.clone()).await;

        let removed = store.delete_job(&dropped.job_id).await;
        assert_eq!(removed.map(|s| s.job_id), Some(dropped.job_id.clone()));
        assert!(store.get_job(&dropped.job_id).await.is_none());
        assert!(store.delete_job(&dropped.job_id).await.is_none());

        let ids: Vec<_> = store.list_jobs().await.into_iter().map(|s| s.job_id).collect();
        assert_eq!(ids, vec![JobId::from_string("kept")]);

        // freed slot: two more puts evict only "kept"
        store.put_job(JobSnapshot::new(JobId::from_string("a"))).await;
        assert!(store.get_job(&JobId::from_string("kept")).await.is_some());
        store.put_job(JobSnapshot::new(JobId::from_string("b"))).await;
        assert!(store.get_job(&JobId::from_string("kept")).await.is_none());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_deleted_batch_is_gone() {
        let store = MemoryBatchStore::new(4);
        store.put_batch(BatchStatus::new("b1", "one", Vec::new())).await;
        assert!(store.delete_batch("b1").await.is_some());
        assert!(store.get_batch("b1").await.is_none());
        assert!(store.list_batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_capacity_keeps_one() {
        let store = MemoryJobStore::new(0);
        store.put_job(JobSnapshot::new(JobId::new())).await;
        assert_eq!(store.capacity(), 1);
        assert!(!store.is_empty().await);
    }
}
