use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::JobRecord;
use crate::store::ResultStore;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    put_attempts: usize,
    failing_puts: Vec<StoreError>,
}

/// Process-local store with the same last-write-wins semantics as the
/// real table, plus injectable write failures.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `n` writes as transiently unavailable.
    pub fn fail_next_puts(&self, n: usize) {
        let errors = (0..n)
            .map(|_| StoreError::Unavailable("injected outage".to_string()))
            .collect();
        self.lock().failing_puts = errors;
    }

    /// Fail the next write with `error`.
    pub fn fail_next_put_with(&self, error: StoreError) {
        self.lock().failing_puts = vec![error];
    }

    /// Write calls seen, failed ones included.
    pub fn put_attempts(&self) -> usize {
        self.lock().put_attempts
    }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.lock().records.get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn put_record(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.put_attempts += 1;
        if !inner.failing_puts.is_empty() {
            return Err(inner.failing_puts.remove(0));
        }
        inner.records.insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.record(job_id))
    }
}
