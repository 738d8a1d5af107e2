pub mod error;
pub mod job;
pub mod local;
pub mod runner;

pub use error::{JobError, QueueError};
pub use job::{Delivery, JobKey, ScheduledJob};
pub use local::{LocalJobQueue, LocalQueueConfig, RunReport};
pub use runner::{JobHandler, JobQueue};
