//! In-memory [`TimerStore`], used by tests and single-process setups.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lapse_core::Timer;

use super::TimerStore;
use crate::error::StoreError;

/// Holds all timers behind one lock, so the uniqueness check and the insert
/// are a single critical section.
#[derive(Debug, Default)]
pub struct MemoryTimerStore {
    timers: Mutex<HashMap<Uuid, Timer>>,
}

impl MemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sorted(mut timers: Vec<Timer>) -> Vec<Timer> {
        timers.sort_by_key(|t| (t.execute_at, t.created_at));
        timers
    }
}

#[async_trait]
impl TimerStore for MemoryTimerStore {
    async fn insert(&self, timer: &Timer) -> Result<Timer, StoreError> {
        let mut timers = self.lock();
        if timer.is_public() {
            let taken = timers
                .values()
                .any(|t| t.target_id == timer.target_id && t.is_public() && t.is_pending());
            if taken {
                return Err(StoreError::DuplicatePublicTimer { target_id: timer.target_id });
            }
        }
        timers.insert(timer.id, timer.clone());
        Ok(timer.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Timer>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn update_schedule(&self, timer: &Timer) -> Result<Option<Timer>, StoreError> {
        let mut timers = self.lock();
        match timers.get_mut(&timer.id) {
            Some(stored) if stored.is_pending() => {
                stored.execute_at = timer.execute_at;
                stored.user_id = timer.user_id;
                stored.category_id = timer.category_id;
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Timer>, StoreError> {
        let mut timers = self.lock();
        Ok(timers.get_mut(&id).map(|stored| {
            stored.deleted_at.get_or_insert(at);
            stored.clone()
        }))
    }

    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut timers = self.lock();
        match timers.get_mut(&id) {
            Some(stored) if stored.processed_at.is_none() => {
                stored.processed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_public_for_target(&self, target_id: Uuid) -> Result<Option<Timer>, StoreError> {
        Ok(self
            .lock()
            .values()
            .find(|t| t.target_id == target_id && t.is_public() && t.is_pending())
            .cloned())
    }

    async fn for_target(&self, target_id: Uuid) -> Result<Vec<Timer>, StoreError> {
        let mut timers: Vec<Timer> = self
            .lock()
            .values()
            .filter(|t| t.target_id == target_id)
            .cloned()
            .collect();
        timers.sort_by_key(|t| t.created_at);
        Ok(timers)
    }

    async fn due_unprocessed(&self, now: DateTime<Utc>) -> Result<Vec<Timer>, StoreError> {
        let due = self
            .lock()
            .values()
            .filter(|t| t.is_pending() && t.kind.is_schedulable() && t.is_due(now))
            .cloned()
            .collect();
        Ok(Self::sorted(due))
    }

    async fn pending_unprocessed(&self) -> Result<Vec<Timer>, StoreError> {
        let pending = self
            .lock()
            .values()
            .filter(|t| t.is_pending() && t.kind.is_schedulable())
            .cloned()
            .collect();
        Ok(Self::sorted(pending))
    }
}
