//! Topic timers: deferred, one-shot state transitions on topics.
//!
//! - [`TimerLifecycle`]: validated create / update / cancel, driving the job queue
//! - [`TimerExecutor`]: the job handler that applies a due timer to its topic
//! - [`Reconciler`]: resubmits due timers whose job was lost
//! - [`store`] / [`topics`]: the persistence and topic collaborators

pub mod error;
pub mod executor;
pub mod job;
pub mod lifecycle;
pub mod reconciler;
pub mod store;
pub mod topics;

pub use error::{ExecutionError, StoreError, TimerError, TopicError};
pub use executor::{ExecutionOutcome, TimerExecutor};
pub use job::TimerJob;
pub use lifecycle::TimerLifecycle;
pub use reconciler::{ReconcileReport, Reconciler};
pub use store::{MemoryTimerStore, PgTimerStore, TimerStore};
pub use topics::{MemoryTopicProvider, PgTopicProvider, TopicProvider};
