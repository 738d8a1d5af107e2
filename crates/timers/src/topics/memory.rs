//! In-memory [`TopicProvider`] with a switch to simulate an outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use lapse_core::TopicSnapshot;

use super::TopicProvider;
use crate::error::TopicError;

#[derive(Debug, Default)]
pub struct MemoryTopicProvider {
    topics: Mutex<HashMap<Uuid, TopicSnapshot>>,
    unavailable: AtomicBool,
    mutations: AtomicUsize,
}

impl MemoryTopicProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open, live topic and return its id.
    pub fn add_open(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.insert(TopicSnapshot {
            id,
            closed: false,
            deleted: false,
            category_id: None,
            bumped_at: None,
        });
        id
    }

    pub fn insert(&self, topic: TopicSnapshot) {
        self.lock().insert(topic.id, topic);
    }

    /// Remove a topic entirely, as if it never existed.
    pub fn remove(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    /// Soft-delete without counting as a timer-driven mutation.
    pub fn soft_delete(&self, id: Uuid) {
        if let Some(topic) = self.lock().get_mut(&id) {
            topic.deleted = true;
        }
    }

    pub fn snapshot(&self, id: Uuid) -> Option<TopicSnapshot> {
        self.lock().get(&id).cloned()
    }

    /// Make every call fail with [`TopicError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of state changes applied through the provider interface.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TopicSnapshot>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), TopicError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TopicError::Unavailable("topic store offline".into()));
        }
        Ok(())
    }

    fn mutate(&self, id: Uuid, f: impl FnOnce(&mut TopicSnapshot)) -> Result<(), TopicError> {
        self.check_available()?;
        let mut topics = self.lock();
        let topic = topics.get_mut(&id).ok_or(TopicError::NotFound(id))?;
        f(topic);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TopicProvider for MemoryTopicProvider {
    async fn get(&self, id: Uuid) -> Result<Option<TopicSnapshot>, TopicError> {
        self.check_available()?;
        Ok(self.snapshot(id))
    }

    async fn set_open_state(&self, id: Uuid, open: bool) -> Result<(), TopicError> {
        self.mutate(id, |t| t.closed = !open)
    }

    async fn publish_to_category(&self, id: Uuid, category_id: Uuid) -> Result<(), TopicError> {
        self.mutate(id, |t| t.category_id = Some(category_id))
    }

    async fn mark_deleted(&self, id: Uuid) -> Result<(), TopicError> {
        self.mutate(id, |t| t.deleted = true)
    }

    async fn bump(&self, id: Uuid) -> Result<(), TopicError> {
        self.mutate(id, |t| t.bumped_at = Some(Utc::now()))
    }
}
