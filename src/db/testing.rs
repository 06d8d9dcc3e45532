//! In-memory stores for exercising the aggregator without SQLite.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::TallyStore;
use crate::error::StorageError;
use crate::models::{Catalog, SurveyState};

/// Keeps the last saved state; writes can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<SurveyState>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<SurveyState> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TallyStore for MemoryStore {
    async fn load(&self, catalog: &Arc<Catalog>) -> Result<SurveyState, StorageError> {
        Ok(self
            .saved()
            .unwrap_or_else(|| SurveyState::fresh(Arc::clone(catalog))))
    }

    async fn save(&self, state: &SurveyState) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Database(sqlx::Error::PoolClosed));
        }
        *self.saved.lock().unwrap() = Some(state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Database(sqlx::Error::PoolClosed));
        }
        self.saved.lock().unwrap().take();
        Ok(())
    }
}
