pub mod clock;
pub mod config;
pub mod error;
pub mod timer;
pub mod topic;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use error::*;
pub use timer::*;
pub use topic::*;
